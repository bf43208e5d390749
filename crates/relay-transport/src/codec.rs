use std::marker::PhantomData;

use bytes::{Bytes, BytesMut};
use serde::de::DeserializeOwned;
use serde::Serialize;
use tokio_util::codec::{Decoder, Encoder, LengthDelimitedCodec};

use crate::TransportError;

/// Length-prefixed JSON frames: decodes `D` from the peer, encodes `E` to it.
pub struct JsonFrameCodec<D, E> {
    frames: LengthDelimitedCodec,
    _marker: PhantomData<fn(E) -> D>,
}

impl<D, E> JsonFrameCodec<D, E> {
    pub fn new(max_frame_bytes: usize) -> Self {
        let frames = LengthDelimitedCodec::builder()
            .max_frame_length(max_frame_bytes.max(1))
            .new_codec();
        Self {
            frames,
            _marker: PhantomData,
        }
    }

    pub fn max_frame_bytes(&self) -> usize {
        self.frames.max_frame_length()
    }
}

impl<D, E> Decoder for JsonFrameCodec<D, E>
where
    D: DeserializeOwned,
{
    type Item = D;
    type Error = TransportError;

    fn decode(&mut self, src: &mut BytesMut) -> Result<Option<Self::Item>, Self::Error> {
        let Some(frame) = self.frames.decode(src)? else {
            return Ok(None);
        };
        serde_json::from_slice(&frame)
            .map(Some)
            .map_err(TransportError::Decode)
    }
}

impl<D, E> Encoder<E> for JsonFrameCodec<D, E>
where
    E: Serialize,
{
    type Error = TransportError;

    fn encode(&mut self, item: E, dst: &mut BytesMut) -> Result<(), Self::Error> {
        let body = serde_json::to_vec(&item).map_err(TransportError::Encode)?;
        self.frames.encode(Bytes::from(body), dst)?;
        Ok(())
    }
}

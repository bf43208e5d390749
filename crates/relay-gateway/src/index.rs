use axum::extract::State;
use axum::response::Html;

use crate::GatewayState;

const WS_PATH_PLACEHOLDER: &str = "__WS_PATH__";

const INDEX_TEMPLATE: &str = r#"<!DOCTYPE html>
<html>
<head>
  <meta charset="utf-8">
  <title>Market Data Relay</title>
  <style>
    body { font-family: sans-serif; margin: 2rem; }
    table { border-collapse: collapse; }
    td, th { padding: 0.3rem 0.8rem; text-align: right; }
    td:first-child, th:first-child { text-align: left; }
    .up { color: #0a7d2c; }
    .down { color: #b3261e; }
  </style>
</head>
<body>
  <h1>Live Prices</h1>
  <p>Status: <span id="status">connecting</span> | Instruments: <span id="count">0</span></p>
  <table>
    <thead><tr><th>Name</th><th>Symbol</th><th>Price</th><th>24h</th></tr></thead>
    <tbody id="rows"></tbody>
  </table>
  <script>
    const latest = new Map();
    const statusEl = document.getElementById('status');
    const rowsEl = document.getElementById('rows');
    const countEl = document.getElementById('count');

    function cell(row, text, className) {
      const td = document.createElement('td');
      td.textContent = text;
      if (className) {
        td.className = className;
      }
      row.appendChild(td);
    }

    function render() {
      const rows = [];
      for (const item of latest.values()) {
        const change = item.price_change_24h || 0;
        const row = document.createElement('tr');
        cell(row, item.name);
        cell(row, item.symbol);
        cell(row, Number(item.current_price).toFixed(4));
        cell(row, change.toFixed(2), change >= 0 ? 'up' : 'down');
        rows.push(row);
      }
      rowsEl.replaceChildren(...rows);
      countEl.textContent = latest.size;
    }

    function connect() {
      const scheme = window.location.protocol === 'https:' ? 'wss:' : 'ws:';
      const ws = new WebSocket(`${scheme}//${window.location.host}__WS_PATH__`);
      ws.onopen = () => { statusEl.textContent = 'connected'; };
      ws.onmessage = (event) => {
        for (const item of JSON.parse(event.data)) {
          latest.set(item.id, item);
        }
        render();
      };
      ws.onclose = () => {
        statusEl.textContent = 'disconnected';
        setTimeout(connect, 3000);
      };
    }

    connect();
  </script>
</body>
</html>
"#;

pub(crate) fn render(ws_path: &str) -> String {
    INDEX_TEMPLATE.replace(WS_PATH_PLACEHOLDER, ws_path)
}

pub(crate) async fn page(State(state): State<GatewayState>) -> Html<String> {
    Html(state.index_page.to_string())
}

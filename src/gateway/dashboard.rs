//! Minimal dashboard page. It polls `/dashboard/status` and `/config` from the browser.

const TEMPLATE: &str = r#"<!DOCTYPE html>
<html lang="en">
<head>
<meta charset="utf-8">
<title>{{BOT_NAME}} dashboard</title>
<style>
  body { font-family: system-ui, sans-serif; margin: 2rem; }
  pre { background: #f4f4f4; padding: 1rem; overflow-x: auto; }
  .ok { color: #107c10; } .off { color: #a4262c; }
</style>
</head>
<body>
<h1>{{BOT_NAME}}</h1>
<p id="status">loading…</p>
<h2>Dispatch</h2>
<pre id="dispatch"></pre>
<h2>Configuration</h2>
<pre id="config"></pre>
<h2>Recent chat logs</h2>
<pre id="logs"></pre>
<script>
async function refresh() {
  const status = await (await fetch('/dashboard/status')).json();
  const el = document.getElementById('status');
  el.textContent = status.statusMessage;
  el.className = status.isObserving ? 'ok' : 'off';
  document.getElementById('dispatch').textContent = JSON.stringify(status.dispatch, null, 2);
  document.getElementById('logs').textContent = JSON.stringify(status.lastLogs, null, 2);
  const config = await (await fetch('/config')).json();
  document.getElementById('config').textContent = JSON.stringify(config, null, 2);
}
refresh();
setInterval(refresh, 2000);
</script>
</body>
</html>
"#;

/// Render the dashboard for the given bot name.
pub fn render(bot_name: &str) -> String {
    TEMPLATE.replace("{{BOT_NAME}}", &escape_html(bot_name))
}

fn escape_html(s: &str) -> String {
    let mut out = String::with_capacity(s.len());
    for c in s.chars() {
        match c {
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            '&' => out.push_str("&amp;"),
            '"' => out.push_str("&quot;"),
            '\'' => out.push_str("&#39;"),
            c => out.push(c),
        }
    }
    out
}

//! WebSocket-based live reload.

use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;

/// Path of the live-reload WebSocket endpoint.
pub const SOCKET_PATH: &str = "/__livereload";

/// Path of the client script.
pub const SCRIPT_PATH: &str = "/__livereload.js";

/// Messages pushed to browsers.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ReloadMessage {
    /// Connection established
    Connected,

    /// Full page reload
    Reload,

    /// Swap the stylesheet at `path` without navigating
    InjectCss {
        /// Site-relative URL of the stylesheet
        path: String,
    },
}

/// Hub for broadcasting reload messages to all connected clients.
#[derive(Debug, Clone)]
pub struct LiveReloadHub {
    sender: broadcast::Sender<ReloadMessage>,
}

impl LiveReloadHub {
    pub fn new() -> Self {
        Self::with_capacity(100)
    }

    /// A hub that buffers at most `capacity` messages per client. Slower
    /// clients lag and are sent a full reload.
    pub fn with_capacity(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity);
        Self { sender }
    }

    /// Send a message to all connected clients.
    pub fn send(&self, msg: ReloadMessage) {
        tracing::debug!("Live reload: {:?} to {} clients", msg, self.subscriber_count());
        // No receivers is fine.
        let _ = self.sender.send(msg);
    }

    pub fn subscribe(&self) -> broadcast::Receiver<ReloadMessage> {
        self.sender.subscribe()
    }

    /// Number of connected clients.
    pub fn subscriber_count(&self) -> usize {
        self.sender.receiver_count()
    }
}

impl Default for LiveReloadHub {
    fn default() -> Self {
        Self::new()
    }
}

/// Tag inserted into served HTML pages.
pub fn script_tag() -> String {
    format!(r#"<script src="{}"></script>"#, SCRIPT_PATH)
}

/// Insert the client script before the last `</body>`, or append it.
pub fn inject_script(html: &str) -> String {
    let tag = script_tag();
    match html.to_ascii_lowercase().rfind("</body>") {
        Some(pos) => {
            let mut out = String::with_capacity(html.len() + tag.len());
            out.push_str(&html[..pos]);
            out.push_str(&tag);
            out.push_str(&html[pos..]);
            out
        }
        None => format!("{}{}", html, tag),
    }
}

/// Client-side live-reload script.
///
/// Connects back to whichever host served the page, so it works for any
/// configured host and port.
pub fn client_script() -> String {
    format!(
        r#"
(function() {{
  'use strict';

  var protocol = location.protocol === 'https:' ? 'wss:' : 'ws:';
  var ws = new WebSocket(protocol + '//' + location.host + '{}');
  var reconnectAttempts = 0;
  var maxReconnectAttempts = 10;

  function injectCss(path) {{
    var links = document.querySelectorAll('link[rel="stylesheet"]');
    var swapped = false;
    links.forEach(function(link) {{
      var url = new URL(link.href, location.href);
      if (url.pathname === path) {{
        url.searchParams.set('livereload', Date.now());
        link.href = url.pathname + url.search;
        swapped = true;
      }}
    }});
    if (!swapped) {{
      location.reload();
    }}
  }}

  ws.onopen = function() {{
    reconnectAttempts = 0;
  }};

  ws.onmessage = function(event) {{
    var msg = JSON.parse(event.data);

    switch (msg.type) {{
      case 'reload':
        location.reload();
        break;

      case 'inject_css':
        injectCss(msg.path);
        break;

      case 'connected':
        console.log('[sluice] Live reload connected');
        break;
    }}
  }};

  ws.onclose = function() {{
    if (reconnectAttempts < maxReconnectAttempts) {{
      reconnectAttempts++;
      setTimeout(function() {{
        location.reload();
      }}, 1000 * reconnectAttempts);
    }}
  }};
}})();
"#,
        SOCKET_PATH
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn hub_broadcasts_messages() {
        let hub = LiveReloadHub::new();
        let mut rx = hub.subscribe();

        hub.send(ReloadMessage::Reload);

        assert_eq!(rx.try_recv().unwrap(), ReloadMessage::Reload);
        assert_eq!(hub.subscriber_count(), 1);
    }

    #[test]
    fn send_without_clients_is_ignored() {
        let hub = LiveReloadHub::new();
        hub.send(ReloadMessage::Reload);
        assert_eq!(hub.subscriber_count(), 0);
    }

    #[test]
    fn serializes_messages() {
        let inject = ReloadMessage::InjectCss {
            path: "/css/styles.css".to_string(),
        };

        assert_eq!(
            serde_json::to_string(&inject).unwrap(),
            r#"{"type":"inject_css","path":"/css/styles.css"}"#
        );
        assert_eq!(
            serde_json::to_string(&ReloadMessage::Connected).unwrap(),
            r#"{"type":"connected"}"#
        );
        assert_eq!(
            serde_json::to_string(&ReloadMessage::Reload).unwrap(),
            r#"{"type":"reload"}"#
        );
    }

    #[test]
    fn injects_before_closing_body() {
        let html = "<html><body><p>hi</p></BODY></html>";

        let out = inject_script(html);

        assert_eq!(
            out,
            r#"<html><body><p>hi</p><script src="/__livereload.js"></script></BODY></html>"#
        );
    }

    #[test]
    fn appends_without_body() {
        let out = inject_script("<p>fragment</p>");
        assert!(out.ends_with(r#"<script src="/__livereload.js"></script>"#));
    }

    #[test]
    fn client_script_targets_socket() {
        let script = client_script();
        assert!(script.contains("/__livereload"));
        assert!(script.contains("inject_css"));
    }
}

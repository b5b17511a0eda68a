//! Page scripts used for network capture
//!
//! `INSTALL_CAPTURE` wraps `fetch` and `XMLHttpRequest` once per document and
//! resets the buffer; `COLLECT_CAPTURE` drains it. Traffic that happened
//! before installation is recovered from resource timing entries.

use serde::Deserialize;

use crate::crawler::task::ApiCallRecord;

/// Wrap fetch/XHR (once per document) and start a new observation window
pub const INSTALL_CAPTURE: &str = r#"
return (function () {
  var state = window.__crawlCapture;
  if (!state) {
    state = window.__crawlCapture = { calls: [], since: 0 };

    var absolute = function (url) {
      try { return new URL(url, location.href).href; } catch (e) { return String(url); }
    };

    var originalFetch = window.fetch;
    if (originalFetch) {
      window.fetch = function (input, init) {
        var url = absolute(typeof input === 'string' ? input : (input && input.url) || String(input));
        var method = String((init && init.method) || (input && input.method) || 'GET').toUpperCase();
        state.calls.push({ type: 'request', url: url, method: method });
        return originalFetch.apply(this, arguments).then(function (response) {
          state.calls.push({ type: 'response', url: url, method: method, status: response.status });
          return response;
        });
      };
    }

    var open = XMLHttpRequest.prototype.open;
    var send = XMLHttpRequest.prototype.send;
    XMLHttpRequest.prototype.open = function (method, url) {
      this.__crawlMethod = String(method || 'GET').toUpperCase();
      this.__crawlUrl = absolute(url);
      return open.apply(this, arguments);
    };
    XMLHttpRequest.prototype.send = function () {
      var xhr = this;
      state.calls.push({ type: 'request', url: xhr.__crawlUrl, method: xhr.__crawlMethod });
      xhr.addEventListener('loadend', function () {
        state.calls.push({ type: 'response', url: xhr.__crawlUrl, method: xhr.__crawlMethod, status: xhr.status });
      });
      return send.apply(this, arguments);
    };
  }

  state.calls = [];
  state.since = performance.now();
  return true;
})();
"#;

/// Return the calls recorded in the current window
///
/// `arguments[0]` is true for passive capture, which also reports every
/// XHR/fetch resource entry since the document loaded.
pub const COLLECT_CAPTURE: &str = r#"
var passive = arguments[0];
var state = window.__crawlCapture || { calls: [], since: 0 };
var since = passive ? 0 : state.since;
var calls = state.calls.slice();
var seen = {};
calls.forEach(function (call) { seen[call.url] = true; });

performance.getEntriesByType('resource').forEach(function (entry) {
  var api = entry.initiatorType === 'xmlhttprequest' || entry.initiatorType === 'fetch';
  if (api && entry.startTime >= since && !seen[entry.name]) {
    seen[entry.name] = true;
    // resource timing does not expose the method
    var call = { type: 'response', url: entry.name, method: 'GET' };
    if (entry.responseStatus) { call.status = entry.responseStatus; }
    calls.push(call);
  }
});

return calls;
"#;

/// Shape returned by [`COLLECT_CAPTURE`]; entries with no URL are dropped
#[derive(Debug, Deserialize)]
#[serde(transparent)]
pub struct CapturedCalls(Vec<serde_json::Value>);

impl CapturedCalls {
    pub fn into_records(self) -> Vec<ApiCallRecord> {
        self.0
            .into_iter()
            .filter_map(|value| serde_json::from_value::<ApiCallRecord>(value).ok())
            .filter(|call| !call.url.is_empty())
            .collect()
    }
}

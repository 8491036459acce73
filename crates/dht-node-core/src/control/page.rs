//! Status page rendering

use alloc::string::String;
use core::fmt::Write;

use super::LogViewMode;
use crate::clock::Timestamp;
use crate::logging::LogEntry;
use crate::sensors::SensorReading;

/// Everything shown on the status page apart from the log table
#[derive(Debug, Clone, Copy)]
pub struct StatusSnapshot {
    pub uptime: Timestamp,
    pub cpu_mhz: u32,
    pub heap_used: usize,
    pub heap_free: usize,
    /// `None` when the sensor could not be read
    pub reading: Option<SensorReading>,
}

const HEAD: &str = "<!DOCTYPE html><html><head><meta charset=\"utf-8\">\
<meta name=\"viewport\" content=\"width=device-width, initial-scale=1\">\
<title>DHT11 node</title>\
<style>body{font-family:sans-serif}td,th{padding:2px 8px;text-align:left}</style>\
</head><body>";

const BUTTONS: &str = "<form style=\"display:inline\" action=\"/refresh\"><button>Refresh</button></form> \
<form style=\"display:inline\" action=\"/terminate\"><button>Terminate application</button></form> \
<form style=\"display:inline\" action=\"/restart\"><button>Restart device</button></form> ";

/// Renders the whole HTML document.
pub fn render(snapshot: &StatusSnapshot, entries: &[LogEntry], mode: LogViewMode) -> String {
    let mut html = String::with_capacity(2048 + entries.len() * 96);
    html.push_str(HEAD);
    html.push_str("<h1>DHT11 sensor node</h1>");
    html.push_str(BUTTONS);
    match mode {
        LogViewMode::Live => html.push_str(
            "<form style=\"display:inline\" action=\"/showpermmsg\"><button>Permanent messages</button></form>",
        ),
        LogViewMode::Permanent => html.push_str(
            "<form style=\"display:inline\" action=\"/showlivemsg\"><button>Live messages</button></form>",
        ),
    }

    html.push_str("<h2>Device</h2><table>");
    let _ = write!(html, "<tr><th>Uptime</th><td>{}</td></tr>", snapshot.uptime.uptime());
    let _ = write!(html, "<tr><th>CPU</th><td>{} MHz</td></tr>", snapshot.cpu_mhz);
    let _ = write!(
        html,
        "<tr><th>Memory</th><td>{} bytes allocated, {} bytes free</td></tr>",
        snapshot.heap_used, snapshot.heap_free
    );
    html.push_str("</table>");

    html.push_str("<h2>Measurement</h2><table>");
    match snapshot.reading {
        Some(reading) => {
            let _ = write!(
                html,
                "<tr><th>Measured at</th><td>{}</td></tr>\
                 <tr><th>Temperature</th><td>{:.1} &deg;C</td></tr>\
                 <tr><th>Humidity</th><td>{:.1} %</td></tr>",
                reading.captured_at(),
                reading.temperature(),
                reading.humidity()
            );
        }
        None => html.push_str(
            "<tr><th>Measured at</th><td>-</td></tr>\
             <tr><th>Temperature</th><td>--.- &deg;C</td></tr>\
             <tr><th>Humidity</th><td>--.- %</td></tr>",
        ),
    }
    html.push_str("</table>");

    html.push_str(match mode {
        LogViewMode::Live => "<h2>Live messages</h2>",
        LogViewMode::Permanent => "<h2>Permanent messages</h2>",
    });
    html.push_str("<table><tr><th>Time</th><th>Severity</th><th>Message</th></tr>");
    for entry in entries {
        let _ = write!(
            html,
            "<tr><td>{}</td><td>{}</td><td>",
            entry.timestamp(),
            entry.severity().name()
        );
        escape_into(&mut html, entry.message());
        html.push_str("</td></tr>");
    }
    html.push_str("</table></body></html>");
    html
}

fn escape_into(out: &mut String, text: &str) {
    for ch in text.chars() {
        match ch {
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            '&' => out.push_str("&amp;"),
            '"' => out.push_str("&quot;"),
            _ => out.push(ch),
        }
    }
}

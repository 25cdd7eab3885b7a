//! JSON-lines host loop
//!
//! Reads one request per line and writes one reply per line. Logging goes to stderr,
//! so the writer only ever carries replies.

use anyhow::{Context, Result};
use serde_json::Value;
use std::io::{BufRead, Write};
use tracing::{debug, info, warn};

use super::messages::{HostReply, HostRequest};
use super::Bridge;

/// Serve requests until the reader is exhausted.
///
/// Only I/O errors end the loop; every request line, readable or not, gets a reply.
pub fn serve<R: BufRead, W: Write>(bridge: &Bridge, mut reader: R, mut writer: W) -> Result<()> {
    info!("Bridge host loop started");
    let mut handled = 0usize;
    let mut buffer = Vec::new();

    loop {
        buffer.clear();
        let read = reader
            .read_until(b'\n', &mut buffer)
            .context("Failed to read request")?;
        if read == 0 {
            break;
        }

        let reply = match std::str::from_utf8(&buffer) {
            Ok(line) if line.trim().is_empty() => continue,
            Ok(line) => handle_line(bridge, line),
            Err(e) => {
                warn!("Rejected request line: {}", e);
                HostReply::Error {
                    id: Value::Null,
                    error: format!("invalid request: {e}"),
                }
            }
        };

        let encoded = serde_json::to_string(&reply).context("Failed to encode reply")?;
        writeln!(writer, "{}", encoded).context("Failed to write reply")?;
        writer.flush().context("Failed to flush reply")?;
        handled += 1;
    }

    info!("Bridge host loop finished after {} requests", handled);
    Ok(())
}

/// Answer a single request line
pub fn handle_line(bridge: &Bridge, line: &str) -> HostReply {
    let request: HostRequest = match serde_json::from_str(line) {
        Ok(request) => request,
        Err(e) => {
            warn!("Rejected request line: {}", e);
            return HostReply::Error {
                id: Value::Null,
                error: format!("invalid request: {e}"),
            };
        }
    };

    debug!("Request {} -> {}", request.id, request.command);

    match bridge.invoke(&request.command, request.args) {
        Ok(result) => HostReply::Result {
            id: request.id,
            result,
        },
        Err(e) => HostReply::Error {
            id: request.id,
            error: e.to_string(),
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::layout::{Detection, ParagraphGrouper};
    use crate::vision::tests::FixedLoader;
    use crate::vision::VisionPipeline;
    use serde_json::json;
    use std::io::Cursor;

    fn bridge() -> Bridge {
        Bridge::with_pipeline(
            VisionPipeline::with_loader(Box::new(FixedLoader::new(vec![])), 0.0),
            ParagraphGrouper::new(),
            vec!["en".to_string()],
        )
    }

    fn run(input: &str) -> Vec<Value> {
        let mut output = Vec::new();
        serve(&bridge(), Cursor::new(input.as_bytes()), &mut output).unwrap();

        String::from_utf8(output)
            .unwrap()
            .lines()
            .map(|l| serde_json::from_str(l).unwrap())
            .collect()
    }

    #[test]
    fn test_one_reply_per_request() {
        let detections = vec![Detection::from_rect(0.0, 0.0, 10.0, 10.0, "Hi", 1.0)];
        let input = format!(
            "{}\n\n{}\n",
            json!({"id": 1, "command": "greet", "args": "Ada"}),
            json!({"id": "b", "command": "group_detections", "args": {"detections": detections}}),
        );

        let replies = run(&input);
        assert_eq!(replies.len(), 2);
        assert_eq!(replies[0], json!({"id": 1, "result": "Ada from ocr-bridge"}));
        assert_eq!(
            replies[1],
            json!({"id": "b", "result": {"status": "success", "paragraphs": ["Hi"]}})
        );
    }

    #[test]
    fn test_bad_line_gets_null_id() {
        let replies = run("not json\n");
        assert_eq!(replies.len(), 1);
        assert!(replies[0]["id"].is_null());
        assert!(replies[0]["error"].as_str().unwrap().starts_with("invalid request"));
    }

    #[test]
    fn test_unknown_command_echoes_id() {
        let replies = run(r#"{"id": 7, "command": "nope"}"#);
        assert_eq!(replies[0], json!({"id": 7, "error": "unknown command 'nope'"}));
    }

    #[test]
    fn test_invalid_utf8_line_keeps_serving() {
        let first = json!({"id": 1, "command": "greet", "args": "a"}).to_string();
        let last = json!({"id": 3, "command": "greet", "args": "b"}).to_string();

        let mut input = first.into_bytes();
        input.push(b'\n');
        input.extend_from_slice(&[0xff, 0xfe, b'\n']);
        input.extend_from_slice(last.as_bytes());

        let mut output = Vec::new();
        serve(&bridge(), Cursor::new(input), &mut output).unwrap();

        let replies: Vec<Value> = String::from_utf8(output)
            .unwrap()
            .lines()
            .map(|l| serde_json::from_str(l).unwrap())
            .collect();
        assert_eq!(replies.len(), 3);
        assert_eq!(replies[0], json!({"id": 1, "result": "a from ocr-bridge"}));
        assert!(replies[1]["id"].is_null());
        assert!(replies[1]["error"].as_str().unwrap().starts_with("invalid request"));
        assert_eq!(replies[2], json!({"id": 3, "result": "b from ocr-bridge"}));
    }

    #[test]
    fn test_empty_input() {
        assert!(run("").is_empty());
    }
}

#[cfg(test)]
#[path = "terminal_test.rs"]
mod tests;

use std::sync::Arc;

use anyhow::Result;
use once_cell::sync::Lazy;
use tokio::io::AsyncBufRead;
use tokio::io::AsyncBufReadExt;
use tokio::io::BufReader;
use tokio::io::Lines;
use tokio::sync::Mutex;

pub type LineReader = Lines<Box<dyn AsyncBufRead + Send + Unpin>>;

/// One line source shared by every reader of the same input. Reads are
/// cancel safe, a dropped read leaves nothing behind waiting on the input.
pub type SharedLines = Arc<Mutex<LineReader>>;

pub fn shared_lines(reader: Box<dyn AsyncBufRead + Send + Unpin>) -> SharedLines {
    return Arc::new(Mutex::new(reader.lines()));
}

/// The process stdin. The chat prompt and the verification prompt both read
/// from here so a line typed for one can never be taken by the other.
pub static STDIN_LINES: Lazy<SharedLines> = Lazy::new(|| {
    return shared_lines(Box::new(BufReader::new(tokio::io::stdin())));
});

pub async fn next_line(lines: &SharedLines) -> Result<Option<String>> {
    let mut lines = lines.lock().await;
    return Ok(lines.next_line().await?);
}

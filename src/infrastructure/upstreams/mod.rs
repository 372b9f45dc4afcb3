pub mod ollama;
pub mod openai;

use anyhow::bail;
use anyhow::Result;
use futures::stream;
use futures::stream::TryStreamExt;
use futures::StreamExt;
use tokio::io::AsyncBufReadExt;
use tokio_util::io::StreamReader;

use crate::domain::models::TextStream;
use crate::domain::models::UpstreamBox;
use crate::domain::models::UpstreamName;

pub struct UpstreamManager {}

impl UpstreamManager {
    pub fn get(name: UpstreamName) -> Result<UpstreamBox> {
        if name == UpstreamName::Ollama {
            return Ok(Box::<ollama::Ollama>::default());
        }

        if name == UpstreamName::OpenAI {
            return Ok(Box::<openai::OpenAI>::default());
        }

        bail!(format!("No upstream implemented for {name}"))
    }
}

fn convert_err(err: reqwest::Error) -> std::io::Error {
    let err_msg = err.to_string();
    return std::io::Error::new(std::io::ErrorKind::Interrupted, err_msg);
}

/// Splits a streamed provider response into lines and maps each through
/// `parse`. Lines that parse to `None` are skipped. The stream ends after the
/// first error.
fn text_lines(
    res: reqwest::Response,
    parse: fn(&str) -> Result<Option<String>>,
) -> TextStream {
    let reader = StreamReader::new(res.bytes_stream().map_err(convert_err));

    return stream::unfold(Some(reader.lines()), move |state| async move {
        let mut lines = state?;
        loop {
            let line = match lines.next_line().await {
                Ok(Some(line)) => line,
                Ok(None) => return None,
                Err(err) => return Some((Err(err.into()), None)),
            };

            match parse(&line) {
                Ok(Some(text)) => return Some((Ok(text), Some(lines))),
                Ok(None) => continue,
                Err(err) => return Some((Err(err), None)),
            }
        }
    })
    .boxed();
}

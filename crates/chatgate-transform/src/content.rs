use chatgate_protocol::openai::create_chat_completions::types::{
    ChatCompletionContentPart, ChatCompletionFileReference, ChatCompletionMessageContent,
};
use chatgate_protocol::upstream::chat::{UpstreamContent, UpstreamContentPart};

use crate::errors::TransformError;

/// Maps client content onto the upstream's text/image/file parts.
///
/// `image_url` becomes an upstream `image`; a `file` needs an id or URL the
/// upstream already knows. Audio and inline file data are rejected.
pub fn upstream_content(
    content: &ChatCompletionMessageContent,
) -> Result<UpstreamContent, TransformError> {
    let parts = match content {
        ChatCompletionMessageContent::Text(text) => {
            return Ok(UpstreamContent::Text(text.clone()));
        }
        ChatCompletionMessageContent::Parts(parts) => parts,
    };
    if parts.is_empty() {
        return Err(TransformError::InvalidContent(
            "content part list is empty".to_string(),
        ));
    }

    parts
        .iter()
        .enumerate()
        .map(|(index, part)| upstream_part(index, part))
        .collect::<Result<Vec<_>, _>>()
        .map(UpstreamContent::Parts)
}

fn upstream_part(
    index: usize,
    part: &ChatCompletionContentPart,
) -> Result<UpstreamContentPart, TransformError> {
    match part {
        ChatCompletionContentPart::Text { text } => {
            Ok(UpstreamContentPart::Text { text: text.clone() })
        }
        ChatCompletionContentPart::ImageUrl { image_url } => {
            non_empty(index, "image_url.url", &image_url.url)?;
            Ok(UpstreamContentPart::Image {
                image: image_url.url.clone(),
            })
        }
        ChatCompletionContentPart::Image { image } => {
            non_empty(index, "image", image)?;
            Ok(UpstreamContentPart::Image {
                image: image.clone(),
            })
        }
        ChatCompletionContentPart::File { file } => {
            let reference = match file {
                ChatCompletionFileReference::Url(url) => Some(url.as_str()),
                ChatCompletionFileReference::Object(object) => object.file_id.as_deref(),
            };
            let Some(reference) = reference.filter(|value| !value.trim().is_empty()) else {
                return Err(TransformError::InvalidContent(format!(
                    "part {index}: file must reference an uploaded file id or url"
                )));
            };
            Ok(UpstreamContentPart::File {
                file: reference.to_string(),
            })
        }
        ChatCompletionContentPart::InputAudio { .. } => Err(TransformError::InvalidContent(
            format!("part {index}: input_audio is not supported"),
        )),
    }
}

fn non_empty(index: usize, field: &str, value: &str) -> Result<(), TransformError> {
    if value.trim().is_empty() {
        return Err(TransformError::InvalidContent(format!(
            "part {index}: {field} is empty"
        )));
    }
    Ok(())
}

use std::io::Cursor;

use anyhow::{Context, Result};
use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine as _;
use image::ImageFormat;

use crate::gemini::GenerateContentResponse;

// walks the stream until the first chunk that carries inline image data and returns
// the decoded bytes. the rest of the stream is left unread.
// returns Ok(None) if the stream ran out without any image.
pub fn read_image_from_stream<I>(stream: I) -> Result<Option<Vec<u8>>>
where
    I: IntoIterator<Item = Result<GenerateContentResponse>>,
{
    for (index, chunk) in stream.into_iter().enumerate() {
        let chunk = chunk.with_context(|| format!("Receiving image stream chunk {index}"))?;
        if let Some(inline) = chunk.first_inline_data() {
            log::debug!(
                "Found inline {} data in chunk {} of the image stream",
                inline.mime_type,
                index
            );
            let bytes = BASE64
                .decode(inline.data.as_bytes())
                .context("Gemini image base64 decode failed")?;
            return Ok(Some(bytes));
        }
        log::trace!("Image stream chunk {index} had no inline data.");
    }

    Ok(None)
}

// decodes whatever image format the bytes are in and re-encodes it as png.
pub fn reencode_as_png(bytes: &[u8]) -> Result<Vec<u8>> {
    let img = image::load_from_memory(bytes).context("Decoding the generated image")?;
    let mut png = Cursor::new(Vec::new());
    img.write_to(&mut png, ImageFormat::Png)
        .context("Encoding the generated image as png")?;
    Ok(png.into_inner())
}

// wraps png bytes as a markdown image with a base64 data uri
pub fn png_markdown(png_bytes: &[u8]) -> String {
    format!("![image](data:image/png;base64,{})", BASE64.encode(png_bytes))
}

// approximate size in bytes of a base64 payload once decoded
pub fn decoded_len(base64_payload: &str) -> usize {
    let trimmed = base64_payload.trim_end_matches('=');
    trimmed.len() * 3 / 4
}

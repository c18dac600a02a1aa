/// Borrowed view of a `data:<mime>;base64,<payload>` URL.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DataUrl<'a> {
    pub mime_type: &'a str,
    pub data: &'a str,
}

impl<'a> DataUrl<'a> {
    /// Returns `None` unless the input starts with `data:` and has a payload.
    /// A missing media type defaults to `image/png`.
    pub fn parse(url: &'a str) -> Option<Self> {
        let rest = url.strip_prefix("data:")?;
        let (meta, data) = rest.split_once(',')?;
        let mime_type = meta.split(';').next().filter(|m| !m.is_empty()).unwrap_or("image/png");
        Some(Self { mime_type, data })
    }

    pub fn encode(mime_type: &str, data: &str) -> String {
        format!("data:{};base64,{}", mime_type, data)
    }
}

//! How a search hit should be rendered.

use crate::models::SearchResult;

const YOUTUBE_FILETYPE: &str = "YouTubeVideo";
const ANSWER_OBJECTTYPE: &str = "QuestionAnswer";
const YOUTUBE_EMBED_PREFIX: &str = "https://www.youtube.com/embed/";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResultKind {
    YouTube,
    Answer,
    Other,
}

impl ResultKind {
    pub fn of(result: &SearchResult) -> Self {
        if result.raw("filetype") == Some(YOUTUBE_FILETYPE) {
            ResultKind::YouTube
        } else if result.raw("objecttype") == Some(ANSWER_OBJECTTYPE) {
            ResultKind::Answer
        } else {
            ResultKind::Other
        }
    }
}

/// Text (or embed URL) to show for a result. Missing data gives `""`.
pub fn display_content(result: &SearchResult) -> String {
    match ResultKind::of(result) {
        ResultKind::YouTube => match result.raw("ytvideoid") {
            Some(id) if !id.is_empty() => format!("{}{}", YOUTUBE_EMBED_PREFIX, id),
            _ => String::new(),
        },
        ResultKind::Answer | ResultKind::Other => {
            result.title().unwrap_or_default().to_string()
        }
    }
}

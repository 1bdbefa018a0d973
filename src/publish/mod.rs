//! Publishing posts and stories, and probing destinations for story support.

mod caption;
mod coordinator;
mod probe;
mod types;

pub use caption::{
    MAX_MEDIA_CAPTION_LENGTH, MAX_STORY_CAPTION_LENGTH, MAX_TEXT_MESSAGE_LENGTH, truncate_caption,
    truncate_for_log, utf16_len,
};
pub use coordinator::{FALLBACK_STORY_TAG, PublishCoordinator, STORY_PERIOD};
pub use probe::{CapabilityProbe, CapabilityReport, StoryRights};
pub use types::{PostOutcome, PublishRequest, PublishResult, PublishStatus, StoryMode, StoryOutcome};

//! Constants shared between the vision side and the language model.

/// Label value ignored by the loss.
pub const IGNORE_INDEX: i64 = -100;

/// Placeholder id spliced into `input_ids` where image features go.
///
/// Negative so it can never collide with a real vocabulary entry.
pub const IMAGE_TOKEN_INDEX: i64 = -200;

/// Marker in prompt text where an image is inserted.
pub const DEFAULT_IMAGE_TOKEN: &str = "<image>";
pub const DEFAULT_IMAGE_PATCH_TOKEN: &str = "<im_patch>";
pub const DEFAULT_IM_START_TOKEN: &str = "<im_start>";
pub const DEFAULT_IM_END_TOKEN: &str = "<im_end>";

/// Per-channel RGB mean of the OpenAI CLIP training data.
pub const OPENAI_CLIP_MEAN: [f32; 3] = [0.481_454_66, 0.457_827_5, 0.408_210_73];

/// Per-channel RGB std of the OpenAI CLIP training data.
pub const OPENAI_CLIP_STD: [f32; 3] = [0.268_629_54, 0.261_302_58, 0.275_777_11];

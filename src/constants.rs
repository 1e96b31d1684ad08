//! Shared constants for prompts, limits and defaults
//!

/// Default cap on any prompt or instruction string, in characters.
pub const DEFAULT_MAX_PROMPT_CHARS: usize = 2000;

/// Room left on top of the prompt cap for the fixed text each query wraps
/// around the caller's request.
pub const QUERY_OVERHEAD_CHARS: usize = 512;

/// Default cap on an uploaded request body, in bytes.
pub const DEFAULT_MAX_UPLOAD_BYTES: usize = 20 * 1024 * 1024;

/// Default wait for a single text or vision completion, in seconds.
pub const DEFAULT_MODEL_TIMEOUT_SECS: u64 = 45;

/// Default wait for an image edit, in seconds.
pub const DEFAULT_GENERATION_TIMEOUT_SECS: u64 = 300;

/// Token budget for completion requests.
pub const COMPLETION_MAX_TOKENS: u32 = 256;

/// Theme used when the caller gives no request.
pub const DEFAULT_THEME: &str = "classic red and gold Christmas";

/// Furnishings used when the vision model names nothing usable.
pub const DEFAULT_FURNISHINGS: &str = "existing furniture";

/// Longest theme phrase carried into the generation prompt, in words.
pub const MAX_THEME_WORDS: usize = 8;

/// Longest furnishing list carried into the generation prompt, in items.
pub const MAX_FURNISHINGS: usize = 3;

/// Reason recorded when the vision model gives no usable verdict.
pub const REASON_INCONCLUSIVE: &str = "inconclusive";

/// Reason recorded when the request is unrelated to decorating.
pub const REASON_PROMPT_NOT_RELEVANT: &str = "prompt not relevant";

/// System prompt for the indoor-room check.
pub const ROOM_CHECK_SYSTEM: &str = "You are a helpful assistant which validates if an image is showing \
an indoor environment like a room, office, or living space.";

/// User message for the indoor-room check.
pub const ROOM_CHECK_QUESTION: &str = "Is this image showing an indoor environment like a room, office, \
or living space that could be decorated for Christmas? Answer with YES or NO first, then a brief reason.";

/// System prompt for the request relevance check.
pub const RELEVANCE_CHECK_SYSTEM: &str = "You are a helpful assistant which validates if the user request \
is about decorating a room or home.";

/// System prompt for the furnishings query.
pub const FURNISHINGS_SYSTEM: &str = "You are a helpful assistant who describes rooms for an interior \
decorator. Reply with a short comma separated list and nothing else.";

/// User message for the furnishings query.
pub const FURNISHINGS_QUESTION: &str = "Identify the 2-3 key furnishings or features in this room \
where Christmas decorations could go.";

/// System prompt for condensing a request into a theme.
pub const THEME_SYSTEM: &str = "You turn decoration requests into a short Christmas decoration theme \
of at most eight words. Reply with the theme only, no punctuation, no quotes, no instructions.";

/// Words accepted as a yes from a validation query.
pub const AFFIRMATIVE_WORDS: &[&str] = &["yes", "y", "yeah", "yep", "true", "affirmative", "correct"];

/// Words accepted as a no from a validation query.
pub const NEGATIVE_WORDS: &[&str] = &["no", "n", "nope", "false", "negative", "incorrect"];

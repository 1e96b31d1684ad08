//! Validation stage: is this a room, and is the request about decorating it.

use std::sync::Arc;

use tracing::{debug, instrument};

use super::ValidationResult;
use crate::constants::{
    AFFIRMATIVE_WORDS, NEGATIVE_WORDS, REASON_INCONCLUSIVE, REASON_PROMPT_NOT_RELEVANT,
    RELEVANCE_CHECK_SYSTEM, ROOM_CHECK_QUESTION, ROOM_CHECK_SYSTEM,
};
use crate::error::{PipelineError, Stage};
use crate::model::{CompletionRequest, ImageInput, ModelClient, QueryTask};

/// Classification of a free-text yes/no answer.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum Verdict {
    /// First word is in the affirmative vocabulary
    Affirmative,
    /// First word is in the negative vocabulary
    Negative,
    /// Anything else
    Uncertain,
}

/// Reads a verdict from the first word of a model reply.
///
/// Leading punctuation and markdown are skipped, then the first run of ASCII
/// letters is compared case-insensitively against [`AFFIRMATIVE_WORDS`] and
/// [`NEGATIVE_WORDS`]. Whatever follows the word is returned as the reason.
pub fn parse_verdict(response: &str) -> (Verdict, String) {
    let trimmed = response.trim_start_matches(|c: char| !c.is_alphanumeric());
    let word_len = trimmed
        .find(|c: char| !c.is_ascii_alphabetic())
        .unwrap_or(trimmed.len());
    let (word, rest) = trimmed.split_at(word_len);
    let word = word.to_ascii_lowercase();

    let verdict = if AFFIRMATIVE_WORDS.contains(&word.as_str()) {
        Verdict::Affirmative
    } else if NEGATIVE_WORDS.contains(&word.as_str()) {
        Verdict::Negative
    } else {
        Verdict::Uncertain
    };
    let reason = rest
        .trim_start_matches(|c: char| !c.is_alphanumeric())
        .trim()
        .to_string();
    (verdict, reason)
}

fn room_query(image: &ImageInput) -> CompletionRequest<'_> {
    CompletionRequest {
        task: QueryTask::RoomCheck,
        system: ROOM_CHECK_SYSTEM,
        user: ROOM_CHECK_QUESTION.to_string(),
        image: Some(image),
    }
}

fn relevance_query<'a>(image: &'a ImageInput, prompt: &str) -> CompletionRequest<'a> {
    CompletionRequest {
        task: QueryTask::RelevanceCheck,
        system: RELEVANCE_CHECK_SYSTEM,
        user: format!(
            "The user wants to: \"{prompt}\". Is this request about decorating this room or a home? \
             Answer with YES or NO first, then a brief reason."
        ),
        image: Some(image),
    }
}

/// Runs the room check and, when a prompt is given, the relevance check.
#[derive(Clone)]
pub struct Validator {
    vision: Arc<dyn ModelClient>,
}

impl Validator {
    /// Validator asking `vision` both questions.
    pub fn new(vision: Arc<dyn ModelClient>) -> Self {
        Self { vision }
    }

    /// Both checks are issued concurrently; a failure of either call fails the stage.
    #[instrument(skip_all, fields(has_prompt = prompt.is_some()))]
    pub async fn validate(
        &self,
        image: &ImageInput,
        prompt: Option<&str>,
    ) -> Result<ValidationResult, PipelineError> {
        let room_query = room_query(image);
        let relevance_query = prompt.map(|prompt| relevance_query(image, prompt));

        let room = self.vision.complete_text(&room_query);
        let relevance = async {
            match &relevance_query {
                Some(query) => self.vision.complete_text(query).await.map(Some),
                None => Ok(None),
            }
        };
        let (room_reply, relevance_reply) =
            tokio::try_join!(room, relevance).map_err(PipelineError::at(Stage::Validation))?;

        let (room_verdict, room_reason) = parse_verdict(&room_reply);
        debug!("Room verdict {:?}: {}", room_verdict, room_reason);
        let mut result = ValidationResult::accepted();
        match room_verdict {
            Verdict::Affirmative => result.room_note = room_reason,
            Verdict::Negative => {
                result.is_valid_room = false;
                result.reason = if room_reason.is_empty() {
                    "the vision model answered NO".to_string()
                } else {
                    room_reason
                };
            }
            Verdict::Uncertain => {
                result.is_valid_room = false;
                result.reason = REASON_INCONCLUSIVE.to_string();
            }
        }

        if let Some(reply) = relevance_reply {
            let (verdict, reason) = parse_verdict(&reply);
            debug!("Relevance verdict {:?}: {}", verdict, reason);
            if verdict != Verdict::Affirmative {
                result.is_prompt_relevant = false;
                if result.is_valid_room {
                    result.reason = REASON_PROMPT_NOT_RELEVANT.to_string();
                }
            }
        }

        Ok(result)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ClientError;
    use crate::model::FixedModelClient;
    use async_trait::async_trait;

    fn image() -> ImageInput {
        ImageInput::new(vec![1, 2, 3], "image/png")
    }

    #[test]
    fn verdict_reads_first_word_only() {
        assert_eq!(
            parse_verdict("YES, this is a living room."),
            (Verdict::Affirmative, "this is a living room.".to_string())
        );
        assert_eq!(
            parse_verdict("**No** - it's a beach"),
            (Verdict::Negative, "it's a beach".to_string())
        );
        assert_eq!(parse_verdict("  yes").0, Verdict::Affirmative);
        assert_eq!(parse_verdict("\"Nope.\"").0, Verdict::Negative);
    }

    #[test]
    fn verdict_is_uncertain_for_prose() {
        assert_eq!(parse_verdict("").0, Verdict::Uncertain);
        assert_eq!(parse_verdict("Yesterday I saw a room").0, Verdict::Uncertain);
        assert_eq!(
            parse_verdict("The image shows a kitchen, so yes").0,
            Verdict::Uncertain
        );
        assert_eq!(parse_verdict("Not really").0, Verdict::Uncertain);
    }

    #[tokio::test]
    async fn empty_prompt_skips_relevance() {
        let vision = FixedModelClient::new("garbage").with_reply(QueryTask::RoomCheck, "YES");
        let result = Validator::new(Arc::new(vision))
            .validate(&image(), None)
            .await
            .expect("validate");
        assert!(result.is_valid_room);
        assert!(result.is_prompt_relevant);
    }

    #[tokio::test]
    async fn unparseable_room_answer_is_inconclusive() {
        let vision = FixedModelClient::new("I think it might be a room?");
        let result = Validator::new(Arc::new(vision))
            .validate(&image(), None)
            .await
            .expect("validate");
        assert!(!result.is_valid_room);
        assert_eq!(result.reason, REASON_INCONCLUSIVE);
    }

    #[tokio::test]
    async fn irrelevant_prompt_is_flagged() {
        let vision = FixedModelClient::new("")
            .with_reply(QueryTask::RoomCheck, "YES - a living room")
            .with_reply(QueryTask::RelevanceCheck, "NO, that is a poem request");
        let result = Validator::new(Arc::new(vision))
            .validate(&image(), Some("write me a poem"))
            .await
            .expect("validate");
        assert!(result.is_valid_room);
        assert!(!result.is_prompt_relevant);
        assert_eq!(result.reason, REASON_PROMPT_NOT_RELEVANT);
        assert_eq!(result.room_note, "a living room");
    }

    struct Unreachable;

    #[async_trait]
    impl ModelClient for Unreachable {
        async fn complete_text(
            &self,
            _request: &CompletionRequest<'_>,
        ) -> Result<String, ClientError> {
            Err(ClientError::Transport("connection refused".to_string()))
        }
    }

    #[tokio::test]
    async fn client_failure_is_a_transport_failure() {
        let err = Validator::new(Arc::new(Unreachable))
            .validate(&image(), Some("icy blue"))
            .await
            .expect_err("should fail");
        assert_eq!(err.stage_tag(), "transport");
    }
}

//! Content oracle: challenge generation and answer scoring
//!
//! The session logic treats the oracle as a black box that may fail, return
//! nothing, or ignore the requested format. Replies are parsed leniently:
//! missing scores become 0 and a Spy challenge without both prompt markers
//! is an error, so the round is not started with half a challenge.

use crate::llm::{GenerateRequest, LlmConfig, LlmError, LlmManager, LlmResult};
use crate::types::{Challenge, GameKind, PlayerId};
use async_trait::async_trait;
use regex::Regex;
use std::collections::BTreeMap;
use std::sync::{Arc, LazyLock};
use std::time::Duration;

/// Upper bound for a single answer score
pub const MAX_SCORE: u32 = 100;

static BASE_PROMPT_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?im)BASE PROMPT:[ \t]*(.+)").expect("valid regex"));
static IMPOSTER_PROMPT_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?im)IMPOSTER PROMPT:[ \t]*(.+)").expect("valid regex"));
static SCORE_LINE_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r#"(?m)^[\s\-*"']*([A-Za-z0-9_\-]+)["']?\s*[:=]\s*(\d+)"#).expect("valid regex")
});

/// Source of challenges and scores for a session
#[async_trait]
pub trait ContentOracle: Send + Sync {
    /// Produce the challenge for a new round
    async fn challenge(&self, kind: GameKind) -> LlmResult<Challenge>;

    /// Score every `(player, response)` pair against `prompt`, 0..=100
    async fn score(
        &self,
        prompt: &str,
        responses: &[(PlayerId, String)],
    ) -> LlmResult<BTreeMap<PlayerId, u32>>;
}

const SPY_CHALLENGE_PROMPT: &str = r#"You are the game master for "Spy Among Prompts".

Write two short, easy writing tasks about everyday office life:
1. BASE PROMPT: one plain sentence of at most 12 words.
2. IMPOSTER PROMPT: the same topic with one subtle twist (audience, place or tone).

Answer with exactly these two lines and nothing else:
BASE PROMPT: <base prompt>
IMPOSTER PROMPT: <imposter prompt>"#;

const QUEST_CHALLENGE_PROMPT: &str = r#"You are the game master for "Prompt Quest".

Invent one short, playful writing challenge that players answer in a sentence or two.
Answer with exactly one line:
BASE PROMPT: <challenge>"#;

/// Extract the two Spy prompts. `None` unless both markers carry text.
pub fn parse_spy_challenge(text: &str) -> Option<Challenge> {
    let base = capture(&BASE_PROMPT_RE, text)?;
    let imposter = capture(&IMPOSTER_PROMPT_RE, text)?;
    Some(Challenge {
        base_prompt: base,
        imposter_prompt: Some(imposter),
    })
}

/// Extract a Quest challenge; falls back to the first non-empty line
pub fn parse_quest_challenge(text: &str) -> Option<Challenge> {
    let base = capture(&BASE_PROMPT_RE, text).or_else(|| {
        text.lines()
            .map(|line| line.trim().trim_matches('"').trim())
            .find(|line| !line.is_empty())
            .map(str::to_string)
    })?;
    Some(Challenge {
        base_prompt: base,
        imposter_prompt: None,
    })
}

fn capture(re: &Regex, text: &str) -> Option<String> {
    re.captures(text)
        .and_then(|c| c.get(1))
        .map(|m| m.as_str().trim().trim_matches('*').trim().to_string())
        .filter(|s| !s.is_empty())
}

/// Build the single scoring request for a Quest round
pub fn scoring_prompt(prompt: &str, responses: &[(PlayerId, String)]) -> String {
    let mut out = format!(
        "You are judging a party game. Challenge: \"{}\"\n\n\
         Score every answer from 0 to {} for creativity and fit.\n\
         Reply with a JSON object mapping each id to its score and nothing else.\n\nAnswers:\n",
        prompt, MAX_SCORE
    );
    for (id, text) in responses {
        out.push_str(&format!("{}: {}\n", id, text.replace('\n', " ")));
    }
    out
}

/// Parse scores for the given players from a free-text reply.
///
/// Accepts a JSON object (possibly wrapped in prose or a code fence) or
/// `id: score` lines. Unknown ids are dropped, missing ids score 0 and
/// values are clamped to `0..=MAX_SCORE`.
pub fn parse_scores(text: &str, responses: &[(PlayerId, String)]) -> BTreeMap<PlayerId, u32> {
    let mut found: BTreeMap<String, u32> = BTreeMap::new();

    let json = text
        .find('{')
        .zip(text.rfind('}'))
        .filter(|(start, end)| start < end)
        .and_then(|(start, end)| {
            serde_json::from_str::<serde_json::Map<String, serde_json::Value>>(&text[start..=end])
                .ok()
        });

    match json {
        Some(map) => {
            for (id, value) in map {
                let score = match &value {
                    serde_json::Value::Number(n) => n.as_f64(),
                    serde_json::Value::String(s) => s.trim().parse::<f64>().ok(),
                    _ => None,
                };
                if let Some(score) = score {
                    found.insert(id, score.round().clamp(0.0, MAX_SCORE as f64) as u32);
                }
            }
        }
        None => {
            for caps in SCORE_LINE_RE.captures_iter(text) {
                let score = caps[2].parse::<u32>().unwrap_or(0);
                found.insert(caps[1].to_string(), score.min(MAX_SCORE));
            }
        }
    }

    responses
        .iter()
        .map(|(id, _)| (id.clone(), found.get(id).copied().unwrap_or(0)))
        .collect()
}

/// Oracle backed by the configured LLM providers
pub struct LlmOracle {
    llm: Arc<LlmManager>,
    timeout: Duration,
    max_tokens: u32,
}

impl LlmOracle {
    pub fn new(llm: Arc<LlmManager>, config: &LlmConfig) -> Self {
        Self {
            llm,
            timeout: config.default_timeout,
            max_tokens: config.default_max_tokens,
        }
    }

    fn request(&self, prompt: String) -> GenerateRequest {
        GenerateRequest {
            prompt,
            max_tokens: Some(self.max_tokens),
            timeout: self.timeout,
            model_override: None,
        }
    }
}

#[async_trait]
impl ContentOracle for LlmOracle {
    async fn challenge(&self, kind: GameKind) -> LlmResult<Challenge> {
        let instruction = match kind {
            GameKind::Spy => SPY_CHALLENGE_PROMPT,
            GameKind::Quest => QUEST_CHALLENGE_PROMPT,
        };
        let (provider, response) = self.llm.generate(self.request(instruction.to_string())).await?;
        tracing::debug!("Challenge from {}: {:?}", provider, response.text);

        let parsed = match kind {
            GameKind::Spy => parse_spy_challenge(&response.text),
            GameKind::Quest => parse_quest_challenge(&response.text),
        };
        parsed.ok_or_else(|| {
            tracing::warn!("Could not extract prompts from {} reply", provider);
            LlmError::ParseError("Failed to extract prompts from reply".to_string())
        })
    }

    async fn score(
        &self,
        prompt: &str,
        responses: &[(PlayerId, String)],
    ) -> LlmResult<BTreeMap<PlayerId, u32>> {
        if responses.is_empty() {
            return Ok(BTreeMap::new());
        }
        let (provider, response) = self
            .llm
            .generate(self.request(scoring_prompt(prompt, responses)))
            .await?;
        let scores = parse_scores(&response.text, responses);
        tracing::info!("Scores from {}: {:?}", provider, scores);
        Ok(scores)
    }
}

use thiserror::Error;

const ORIGIN_INDEX: usize = 0;
const COMPONENT_INDEX: usize = 2;
const SUBCOMPONENT_INDEX: usize = 3;
const COUNTS_INDEX: usize = 6;
const MIN_IDENTITY_TOKENS: usize = SUBCOMPONENT_INDEX + 1;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct TestCounts {
    pub passed: u64,
    pub total: u64,
}

/// Decoded form of the positional description the executor job stamps on every build:
///
/// ```text
/// <origin build> <any> <component> <subcomponent> <any> <any> [<passed>/<total>] ...
/// ```
///
/// The counts token is only present once the sub-build has published its results.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParsedDescription {
    pub origin_build: String,
    pub component: String,
    /// Lower-cased so it lines up with taxonomy keys.
    pub subcomponent: String,
    pub counts: TestCounts,
    /// Counts token whose passed half could not be read; counts are zero in that case.
    pub unreadable_counts: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ParseFailure {
    #[error("description has {found} tokens, need at least {}", MIN_IDENTITY_TOKENS)]
    TooFewTokens { found: usize },
}

pub fn parse_description(description: &str) -> Result<ParsedDescription, ParseFailure> {
    let tokens: Vec<&str> = description.split_whitespace().collect();
    if tokens.len() < MIN_IDENTITY_TOKENS {
        return Err(ParseFailure::TooFewTokens {
            found: tokens.len(),
        });
    }

    let (counts, unreadable_counts) = match tokens.get(COUNTS_INDEX) {
        Some(token) => match parse_counts(token) {
            Some(counts) => (counts, None),
            None => (TestCounts::default(), Some(token.to_string())),
        },
        None => (TestCounts::default(), None),
    };

    Ok(ParsedDescription {
        origin_build: tokens[ORIGIN_INDEX].to_string(),
        component: tokens[COMPONENT_INDEX].to_string(),
        subcomponent: tokens[SUBCOMPONENT_INDEX].to_lowercase(),
        counts,
        unreadable_counts,
    })
}

/// Only the passed half is required; the total is best effort and reads as 0 when absent.
fn parse_counts(token: &str) -> Option<TestCounts> {
    // Strip one delimiter on each side, whatever it is.
    let mut chars = token.chars();
    chars.next();
    chars.next_back();
    let mut fields = chars.as_str().split('/');

    let passed = fields.next()?.trim().parse::<u64>().ok()?;
    let total = fields
        .next()
        .and_then(|total| total.trim().parse::<u64>().ok())
        .unwrap_or(0);
    Some(TestCounts { passed, total })
}

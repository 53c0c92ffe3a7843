//! Interactive choice capability.
//!
//! Everything that needs operator input goes through [`Selector`], so the
//! resolution and orchestration code can be driven by fakes in tests.

use std::collections::BTreeSet;

use anyhow::Result;
use inquire::error::InquireError;
use inquire::{Select, Text};
use thiserror::Error;

const PAGE_SIZE: usize = 20;
const DONE: &str = "Done";

/// Extra filter applied to a choice label: `(input, index) -> keep`.
pub type Matcher<'a> = &'a dyn Fn(&str, usize) -> bool;

/// The operator aborted a prompt. Aborts the whole invocation.
#[derive(Debug, Error)]
#[error("operation cancelled")]
pub struct Cancelled;

pub trait Selector {
    /// Returns the index of the chosen item in `choices`.
    fn select(&self, label: &str, choices: &[String], matcher: Option<Matcher>) -> Result<usize>;

    /// Returns the chosen indices in ascending order.
    fn multi_select(
        &self,
        label: &str,
        choices: &[String],
        matcher: Option<Matcher>,
    ) -> Result<Vec<usize>>;

    fn prompt(&self, label: &str, default: &str) -> Result<String>;
}

/// Terminal implementation backed by `inquire`.
pub struct InquireSelector;

impl InquireSelector {
    fn select_from(
        &self,
        label: &str,
        choices: &[String],
        matcher: Option<Matcher>,
        cursor: usize,
    ) -> Result<usize> {
        let scorer = |input: &str, _: &String, string_value: &str, index: usize| -> Option<i64> {
            let keep = match matcher {
                Some(matcher) => matcher(input, index),
                None => fuzzy_match_fold(input, string_value),
            };
            keep.then_some(0)
        };
        let answer = Select::new(label, choices.to_vec())
            .with_page_size(PAGE_SIZE)
            .with_starting_cursor(cursor)
            .with_scorer(&scorer)
            .raw_prompt()
            .map_err(prompt_error)?;
        Ok(answer.index)
    }
}

impl Selector for InquireSelector {
    fn select(&self, label: &str, choices: &[String], matcher: Option<Matcher>) -> Result<usize> {
        if choices.is_empty() {
            anyhow::bail!("nothing to choose from for '{}'", label);
        }
        self.select_from(label, choices, matcher, 0)
    }

    fn multi_select(
        &self,
        label: &str,
        choices: &[String],
        matcher: Option<Matcher>,
    ) -> Result<Vec<usize>> {
        match choices.len() {
            0 => return Ok(Vec::new()),
            1 => return Ok(vec![0]),
            _ => {}
        }

        let mut chosen = BTreeSet::new();
        let mut cursor = 0;
        loop {
            let mut entries = Vec::with_capacity(choices.len() + 1);
            entries.push(DONE.to_string());
            for (index, choice) in choices.iter().enumerate() {
                let mark = if chosen.contains(&index) { "[x]" } else { "[ ]" };
                entries.push(format!("{} {}", mark, choice));
            }

            // Entry 0 is the sentinel, so the caller's matcher sees shifted indices.
            let shifted = |input: &str, index: usize| match (index, matcher) {
                (0, _) => true,
                (index, Some(matcher)) => matcher(input, index - 1),
                (index, None) => fuzzy_match_fold(input, &choices[index - 1]),
            };

            let picked = self.select_from(label, &entries, Some(&shifted), cursor)?;
            if picked == 0 {
                break;
            }
            let index = picked - 1;
            if !chosen.remove(&index) {
                chosen.insert(index);
            }
            cursor = picked;
        }
        Ok(chosen.into_iter().collect())
    }

    fn prompt(&self, label: &str, default: &str) -> Result<String> {
        let mut text = Text::new(label);
        if !default.is_empty() {
            text = text.with_default(default);
        }
        let answer = text.prompt().map_err(prompt_error)?;
        Ok(answer.trim().to_string())
    }
}

fn prompt_error(err: InquireError) -> anyhow::Error {
    match err {
        InquireError::OperationCanceled | InquireError::OperationInterrupted => Cancelled.into(),
        other => anyhow::Error::new(other).context("Prompt failed"),
    }
}

/// Case-insensitive in-order subsequence match of `needle` inside `haystack`.
pub fn fuzzy_match_fold(needle: &str, haystack: &str) -> bool {
    let mut remaining = haystack.chars().flat_map(char::to_lowercase);
    needle
        .chars()
        .flat_map(char::to_lowercase)
        .all(|wanted| remaining.any(|c| c == wanted))
}

/// Matcher that anchors on `prefix` when the input starts with it (so "#2"
/// selects the label starting with "#2"), and falls back to fuzzy matching
/// across the whole label otherwise.
pub fn prefix_anchored<'a>(labels: &'a [String], prefix: &'a str) -> impl Fn(&str, usize) -> bool + 'a {
    move |input: &str, index: usize| {
        let Some(label) = labels.get(index) else {
            return false;
        };
        if input.starts_with(prefix) {
            label.starts_with(input)
        } else {
            fuzzy_match_fold(input, label)
        }
    }
}

/// Whether an error chain ends in an operator cancellation.
pub fn is_cancelled(err: &anyhow::Error) -> bool {
    err.downcast_ref::<Cancelled>().is_some()
}

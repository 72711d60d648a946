//! Operator prompts
//!
//! Every prompt can be canceled: `q` or end of input yields `Canceled`, which
//! the runner turns into a canceled step, never a failed one.

use console::{style, Term};
use std::collections::VecDeque;
use thiserror::Error;

/// The operator backed out of a prompt
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
#[error("canceled by operator")]
pub struct Canceled;

pub type PromptResult<T> = Result<T, Canceled>;

pub trait Prompter {
    /// Yes/no question; empty answer means no
    fn confirm(&mut self, question: &str) -> PromptResult<bool>;

    /// Second confirmation before a destructive action: the operator has to
    /// type `token` exactly
    fn confirm_destructive(&mut self, warning: &str, token: &str) -> PromptResult<bool>;

    /// Free text; empty answer takes the default
    fn input(&mut self, question: &str, default: Option<&str>) -> PromptResult<String>;

    /// Pick one of `options`, returns its index
    fn choose(&mut self, question: &str, options: &[String]) -> PromptResult<usize>;

    /// Plain message to the operator
    fn notify(&mut self, message: &str);
}

fn is_cancel(answer: &str) -> bool {
    matches!(answer.trim(), "q" | "Q" | "quit")
}

fn interpret_confirm(answer: &str) -> Option<bool> {
    match answer.trim().to_ascii_lowercase().as_str() {
        "y" | "yes" => Some(true),
        "n" | "no" | "" => Some(false),
        _ => None,
    }
}

fn interpret_choice(answer: &str, len: usize) -> Option<usize> {
    answer
        .trim()
        .parse::<usize>()
        .ok()
        .filter(|n| *n >= 1 && *n <= len)
        .map(|n| n - 1)
}

/// Interactive prompts on the controlling terminal
pub struct TerminalPrompter {
    term: Term,
}

impl Default for TerminalPrompter {
    fn default() -> Self {
        Self::new()
    }
}

impl TerminalPrompter {
    pub fn new() -> Self {
        Self {
            term: Term::stdout(),
        }
    }

    fn ask(&self, prompt: &str) -> PromptResult<String> {
        if self.term.write_str(prompt).is_err() {
            return Err(Canceled);
        }
        let _ = self.term.flush();
        // Errors here are EOF or a dead terminal.
        let answer = self.term.read_line().map_err(|_| Canceled)?;
        if is_cancel(&answer) {
            return Err(Canceled);
        }
        Ok(answer)
    }
}

impl Prompter for TerminalPrompter {
    fn confirm(&mut self, question: &str) -> PromptResult<bool> {
        loop {
            let answer = self.ask(&format!("{} [y/N/q] ", question))?;
            if let Some(yes) = interpret_confirm(&answer) {
                return Ok(yes);
            }
            self.notify("Please answer y, n or q.");
        }
    }

    fn confirm_destructive(&mut self, warning: &str, token: &str) -> PromptResult<bool> {
        let _ = self
            .term
            .write_line(&format!("{} {}", style("DESTRUCTIVE:").red().bold(), warning));
        let answer = self.ask(&format!("Type {} to proceed (anything else aborts): ", style(token).bold()))?;
        Ok(answer.trim() == token)
    }

    fn input(&mut self, question: &str, default: Option<&str>) -> PromptResult<String> {
        let prompt = match default {
            Some(d) if !d.is_empty() => format!("{} [{}]: ", question, d),
            _ => format!("{}: ", question),
        };
        let answer = self.ask(&prompt)?;
        let answer = answer.trim();
        if answer.is_empty() {
            Ok(default.unwrap_or_default().to_string())
        } else {
            Ok(answer.to_string())
        }
    }

    fn choose(&mut self, question: &str, options: &[String]) -> PromptResult<usize> {
        if options.is_empty() {
            return Err(Canceled);
        }
        let _ = self.term.write_line(question);
        for (i, option) in options.iter().enumerate() {
            let _ = self.term.write_line(&format!("  {:>2}) {}", i + 1, option));
        }
        loop {
            let answer = self.ask(&format!("Choice [1-{}, q]: ", options.len()))?;
            if let Some(idx) = interpret_choice(&answer, options.len()) {
                return Ok(idx);
            }
            self.notify("Not a valid choice.");
        }
    }

    fn notify(&mut self, message: &str) {
        let _ = self.term.write_line(message);
    }
}

/// Replays queued answers; running out of answers is treated as EOF
#[derive(Debug, Default)]
pub struct ScriptedPrompter {
    answers: VecDeque<String>,
    /// Questions and notifications, in order
    pub transcript: Vec<String>,
}

impl ScriptedPrompter {
    pub fn new<I, S>(answers: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            answers: answers.into_iter().map(Into::into).collect(),
            transcript: Vec::new(),
        }
    }

    fn next(&mut self, question: &str) -> PromptResult<String> {
        self.transcript.push(question.to_string());
        let answer = self.answers.pop_front().ok_or(Canceled)?;
        if is_cancel(&answer) {
            return Err(Canceled);
        }
        Ok(answer)
    }

    pub fn remaining(&self) -> usize {
        self.answers.len()
    }
}

impl Prompter for ScriptedPrompter {
    fn confirm(&mut self, question: &str) -> PromptResult<bool> {
        let answer = self.next(question)?;
        Ok(interpret_confirm(&answer).unwrap_or(false))
    }

    fn confirm_destructive(&mut self, warning: &str, token: &str) -> PromptResult<bool> {
        let answer = self.next(warning)?;
        Ok(answer.trim() == token)
    }

    fn input(&mut self, question: &str, default: Option<&str>) -> PromptResult<String> {
        let answer = self.next(question)?;
        if answer.trim().is_empty() {
            Ok(default.unwrap_or_default().to_string())
        } else {
            Ok(answer.trim().to_string())
        }
    }

    fn choose(&mut self, question: &str, options: &[String]) -> PromptResult<usize> {
        let answer = self.next(question)?;
        interpret_choice(&answer, options.len()).ok_or(Canceled)
    }

    fn notify(&mut self, message: &str) {
        self.transcript.push(message.to_string());
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_interpret_confirm() {
        assert_eq!(interpret_confirm("Y"), Some(true));
        assert_eq!(interpret_confirm(" yes "), Some(true));
        assert_eq!(interpret_confirm(""), Some(false));
        assert_eq!(interpret_confirm("maybe"), None);
    }

    #[test]
    fn test_scripted_cancel_and_eof() {
        let mut p = ScriptedPrompter::new(["q"]);
        assert_eq!(p.confirm("run?"), Err(Canceled));
        assert_eq!(p.confirm("run?"), Err(Canceled));
    }

    #[test]
    fn test_scripted_destructive_needs_exact_token() {
        let mut p = ScriptedPrompter::new(["/dev/sdb", "yes"]);
        assert_eq!(p.confirm_destructive("wipe", "/dev/sdb"), Ok(true));
        assert_eq!(p.confirm_destructive("wipe", "/dev/sdb"), Ok(false));
    }

    #[test]
    fn test_scripted_input_default_and_choice() {
        let mut p = ScriptedPrompter::new(["", "2", "9"]);
        assert_eq!(p.input("hostname", Some("hv01")).unwrap(), "hv01");
        let options = vec!["a".to_string(), "b".to_string()];
        assert_eq!(p.choose("pick", &options), Ok(1));
        assert_eq!(p.choose("pick", &options), Err(Canceled));
    }
}

//! Operator interaction: prompts and leveled output.
//!
//! Every prompt blocks until the operator answers. There is one operator and no
//! timeout; a closed stdin is reported as an `Interaction` error so loops that
//! keep asking cannot spin forever.

use std::io::{stdin, stdout, BufRead, Write};

use crate::errors::{AppError, Result};

pub trait InteractionPort: Send + Sync {
    /// Asks for free text; an empty answer selects `default` when there is one.
    fn ask(&self, prompt: &str, default: Option<&str>) -> Result<String>;

    fn confirm(&self, prompt: &str, default: bool) -> Result<bool>;

    /// Blocks until the operator acknowledges. `false` means the operator wants out.
    fn retry_prompt(&self) -> Result<bool>;

    fn info(&self, message: &str);
    fn success(&self, message: &str);
    fn error(&self, message: &str);
    fn complete(&self, message: &str);
}

/// Terminal implementation on stdin/stdout.
#[derive(Debug, Default)]
pub struct ConsoleInteraction;

impl ConsoleInteraction {
    pub fn new() -> Self {
        ConsoleInteraction
    }

    fn read_answer(&self, rendered_prompt: &str) -> Result<String> {
        print!("{}", rendered_prompt);
        stdout().flush()?;

        let mut input = String::new();
        let read = stdin().lock().read_line(&mut input)?;
        if read == 0 {
            return Err(AppError::Interaction(
                "input closed while waiting for an answer".to_string(),
            ));
        }
        Ok(input.trim_end_matches(['\r', '\n']).to_string())
    }

    fn read_yes_no(&self, rendered_prompt: &str, default: bool) -> Result<bool> {
        loop {
            let answer = self.read_answer(rendered_prompt)?;
            match parse_yes_no(&answer, default) {
                Some(choice) => return Ok(choice),
                None => println!("    Please answer 'y' or 'n'."),
            }
        }
    }
}

impl InteractionPort for ConsoleInteraction {
    fn ask(&self, prompt: &str, default: Option<&str>) -> Result<String> {
        let rendered = match default {
            Some(default) if !default.is_empty() => format!(" 🔶  {} ({}): ", prompt, default),
            _ => format!(" 🔶  {}: ", prompt),
        };
        let answer = self.read_answer(&rendered)?;
        match default {
            Some(default) if answer.is_empty() => Ok(default.to_string()),
            _ => Ok(answer),
        }
    }

    fn confirm(&self, prompt: &str, default: bool) -> Result<bool> {
        self.read_yes_no(&format!(" 🔶  {} (y/n): ", prompt), default)
    }

    fn retry_prompt(&self) -> Result<bool> {
        self.read_yes_no(" 🔶  (press return to retry, 'n' to give up) ", true)
    }

    fn info(&self, message: &str) {
        println!("    {}", message);
    }

    fn success(&self, message: &str) {
        println!(" ✅  {}", message);
    }

    fn error(&self, message: &str) {
        println!(" 🆘 \x1b[31m {}\x1b[0m", message);
    }

    fn complete(&self, message: &str) {
        println!(" 🌟 🌟 🌟  {} 🌟 🌟 🌟", message);
    }
}

/// `None` when the answer is neither empty nor a recognizable yes/no.
fn parse_yes_no(answer: &str, default: bool) -> Option<bool> {
    match answer.trim().to_ascii_lowercase().as_str() {
        "" => Some(default),
        "y" | "yes" => Some(true),
        "n" | "no" => Some(false),
        _ => None,
    }
}

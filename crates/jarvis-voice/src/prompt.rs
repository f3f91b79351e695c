//! Startup questions on the terminal: which microphone, which local model.

use std::io::{BufRead, Write};

/// First device whose name contains one of `hints`, else 0.
pub fn suggest_device(names: &[String], hints: &[String]) -> usize {
    names
        .iter()
        .position(|name| hints.iter().any(|h| name.contains(h.as_str())))
        .unwrap_or(0)
}

/// Ask for a microphone index. Enter (or end of input) picks the suggested one.
pub fn select_microphone<R: BufRead, W: Write>(
    names: &[String],
    hints: &[String],
    input: &mut R,
    out: &mut W,
) -> std::io::Result<usize> {
    let suggested = suggest_device(names, hints);
    writeln!(out, "\n🎙️ SELECT MICROPHONE:")?;
    for (i, name) in names.iter().enumerate() {
        writeln!(out, "  [{}] {}", i, name)?;
    }

    loop {
        write!(out, "Microphone index (default: {}): ", suggested)?;
        out.flush()?;
        let Some(line) = read_line(input)? else {
            return Ok(suggested);
        };
        if line.is_empty() {
            return Ok(suggested);
        }
        match line.parse::<usize>() {
            Ok(idx) if idx < names.len() => return Ok(idx),
            Ok(_) => writeln!(out, "Invalid index. Pick a number between 0 and {}.", names.len().saturating_sub(1))?,
            Err(_) => writeln!(out, "Invalid input. Enter a number.")?,
        }
    }
}

/// Ask which installed model to use. Enter (or end of input) picks the first.
///
/// Returns `None` when there is nothing to choose from.
pub fn select_ollama_model<R: BufRead, W: Write>(
    models: &[String],
    input: &mut R,
    out: &mut W,
) -> std::io::Result<Option<String>> {
    let Some(first) = models.first() else {
        return Ok(None);
    };
    writeln!(out, "\n🧠 Ollama models found. Select the model to use:")?;
    for (i, m) in models.iter().enumerate() {
        writeln!(out, "  [{}] {}", i, m)?;
    }

    loop {
        write!(out, "\nNumber or Enter (default: {}): ", first)?;
        out.flush()?;
        let Some(line) = read_line(input)? else {
            return Ok(Some(first.clone()));
        };
        if line.is_empty() {
            return Ok(Some(first.clone()));
        }
        match line.parse::<usize>() {
            Ok(idx) if idx < models.len() => return Ok(Some(models[idx].clone())),
            _ => writeln!(out, "Invalid selection. Try again.")?,
        }
    }
}

fn read_line<R: BufRead>(input: &mut R) -> std::io::Result<Option<String>> {
    let mut line = String::new();
    if input.read_line(&mut line)? == 0 {
        return Ok(None);
    }
    Ok(Some(line.trim().to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;

    fn names(list: &[&str]) -> Vec<String> {
        list.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn test_suggest_prefers_hinted_device() {
        let mics = names(&["Built-in Microphone", "Fifine K669 USB", "USB Audio"]);
        assert_eq!(suggest_device(&mics, &names(&["Fifine", "USB"])), 1);
        assert_eq!(suggest_device(&mics, &names(&["Rode"])), 0);
    }

    #[test]
    fn test_enter_accepts_suggestion() {
        let mics = names(&["Built-in", "USB mic"]);
        let mut out = Vec::new();
        let idx = select_microphone(&mics, &names(&["USB"]), &mut Cursor::new("\n"), &mut out).unwrap();
        assert_eq!(idx, 1);
        assert!(String::from_utf8(out).unwrap().contains("[1] USB mic"));
    }

    #[test]
    fn test_invalid_answers_reprompt() {
        let mics = names(&["a", "b", "c"]);
        let mut out = Vec::new();
        let idx = select_microphone(&mics, &[], &mut Cursor::new("x\n7\n2\n"), &mut out).unwrap();
        assert_eq!(idx, 2);
        let text = String::from_utf8(out).unwrap();
        assert!(text.contains("Invalid input"));
        assert!(text.contains("Invalid index"));
    }

    #[test]
    fn test_model_selection() {
        let models = names(&["llama3.1:8b", "qwen3:4b"]);
        let mut out = Vec::new();
        assert_eq!(
            select_ollama_model(&models, &mut Cursor::new("1\n"), &mut out).unwrap(),
            Some("qwen3:4b".to_string())
        );
        assert_eq!(
            select_ollama_model(&models, &mut Cursor::new(""), &mut out).unwrap(),
            Some("llama3.1:8b".to_string())
        );
        assert_eq!(select_ollama_model(&[], &mut Cursor::new(""), &mut out).unwrap(), None);
    }
}

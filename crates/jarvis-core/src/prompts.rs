//! Prompt text for the generation loop.

use chrono::{DateTime, Local};

/// System instruction with the current date and time, in the configured locale.
pub fn system_instruction(locale: &str, now: DateTime<Local>) -> String {
    let stamp = now.format("%d/%m/%Y %H:%M");
    match locale {
        "it" => format!(
            "Oggi è {stamp}. Sei Jarvis, un assistente vocale. Rispondi in italiano in modo conciso e utile, \
             con frasi brevi adatte a essere lette ad alta voce. \
             Usa i tuoi strumenti per ogni compito che non puoi risolvere internamente. \
             Usa `save_memory` solo per fatti personali espliciti e importanti. \
             Usa `web_search` solo quando l'utente chiede chiaramente di cercare su internet, \
             con una query breve e fedele all'intento dell'utente."
        ),
        _ => format!(
            "Today is {stamp}. You are Jarvis, a voice assistant. Answer concisely and helpfully, \
             in short sentences suitable for being read aloud. \
             Use your tools for any task you cannot solve on your own. \
             Use `save_memory` only for explicit, important personal facts. \
             Use `web_search` only when the user clearly asks to search the internet, \
             with a short query faithful to their intent."
        ),
    }
}

/// Prepend recalled memories to the user's text as background facts.
pub fn with_memories(locale: &str, memories: &[String], user_text: &str) -> String {
    if memories.is_empty() {
        return user_text.to_string();
    }
    let (header, user_label) = match locale {
        "it" => ("INFO MEMORIA:", "UTENTE:"),
        _ => ("MEMORY INFO:", "USER:"),
    };
    let facts: Vec<String> = memories.iter().map(|m| format!("- {m}")).collect();
    format!("{header}\n{}\n\n{user_label} {user_text}", facts.join("\n"))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_no_memories_leaves_text() {
        assert_eq!(with_memories("it", &[], "ciao"), "ciao");
    }

    #[test]
    fn test_memories_block_format() {
        let text = with_memories("it", &["U: mi chiamo Luca".to_string()], "come mi chiamo?");
        assert_eq!(text, "INFO MEMORIA:\n- U: mi chiamo Luca\n\nUTENTE: come mi chiamo?");
    }

    #[test]
    fn test_instruction_carries_date() {
        let now = Local::now();
        let text = system_instruction("it", now);
        assert!(text.contains(&now.format("%d/%m/%Y").to_string()));
    }
}

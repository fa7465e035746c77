//! C5: Role Renderer. Expands a character card into a stable textual block.
//! Injects no behavioral rules — those come from SystemPromptModules.

use domain::CharacterCard;

const DESCRIPTION_CLIP: usize = 800;
const PERSONA_CLIP: usize = 600;
const SCENARIO_CLIP: usize = 600;
const CREATOR_NOTES_CLIP: usize = 600;
const SYSTEM_PROMPT_CLIP: usize = 800;
const FIRST_MES_CLIP: usize = 1200;

fn expand_placeholders(text: &str, card_name: &str, user_alias: &str) -> String {
    text.replace("{{user}}", user_alias)
        .replace("{{User}}", user_alias)
        .replace("{{char}}", card_name)
        .replace("{{Character}}", card_name)
}

/// Clip to `max_chars`, respecting UTF-8 char boundaries.
fn clip(text: &str, max_chars: usize) -> String {
    if text.chars().count() <= max_chars {
        return text.to_string();
    }
    text.chars().take(max_chars).collect()
}

fn render_field(text: &str, card_name: &str, user_alias: &str, max_chars: usize) -> String {
    clip(&expand_placeholders(text, card_name, user_alias), max_chars)
}

/// Render the card into a single text block. Placeholder expansion happens
/// before clipping so a substitution near the clip boundary isn't cut mid
/// token.
pub fn render_role(card: &CharacterCard, user_alias: &str) -> String {
    let name = card.name.as_str();
    let mut parts = Vec::new();

    if !card.description.trim().is_empty() {
        parts.push(format!(
            "Description: {}",
            render_field(&card.description, name, user_alias, DESCRIPTION_CLIP)
        ));
    }
    if !card.persona.trim().is_empty() {
        parts.push(format!(
            "Persona: {}",
            render_field(&card.persona, name, user_alias, PERSONA_CLIP)
        ));
    }
    if !card.scenario.trim().is_empty() {
        parts.push(format!(
            "Scenario: {}",
            render_field(&card.scenario, name, user_alias, SCENARIO_CLIP)
        ));
    }
    if !card.system_prompt.trim().is_empty() {
        parts.push(render_field(&card.system_prompt, name, user_alias, SYSTEM_PROMPT_CLIP));
    }
    if !card.creator_notes.trim().is_empty() {
        parts.push(format!(
            "Creator notes: {}",
            render_field(&card.creator_notes, name, user_alias, CREATOR_NOTES_CLIP)
        ));
    }
    if !card.first_mes.trim().is_empty() {
        parts.push(format!(
            "First message: {}",
            render_field(&card.first_mes, name, user_alias, FIRST_MES_CLIP)
        ));
    }

    parts.join("\n\n")
}

#[cfg(test)]
mod tests {
    use super::*;
    use uuid::Uuid;

    fn card() -> CharacterCard {
        CharacterCard {
            id: Uuid::nil(),
            name: "Ren".into(),
            description: String::new(),
            persona: "{{char}} greets {{user}}.".into(),
            scenario: String::new(),
            first_mes: String::new(),
            system_prompt: String::new(),
            creator_notes: String::new(),
            tags: vec![],
            alternate_greetings: vec![],
            user_alias: None,
        }
    }

    #[test]
    fn placeholder_expansion_before_clipping() {
        let rendered = render_role(&card(), "Alex");
        assert!(rendered.contains("Ren greets Alex."));
    }

    #[test]
    fn long_field_is_clipped() {
        let mut c = card();
        c.persona = "x".repeat(1000);
        let rendered = render_role(&c, "Alex");
        let persona_line = rendered.lines().find(|l| l.starts_with("Persona:")).unwrap();
        assert!(persona_line.chars().count() <= PERSONA_CLIP + "Persona: ".chars().count());
    }

    #[test]
    fn empty_fields_omitted() {
        let c = card();
        let rendered = render_role(&c, "Alex");
        assert!(!rendered.contains("Description:"));
    }
}

//! Minimal prompt builders.
//!
//! Each prompt carries the learner's context and asks for the JSON shape the
//! matching parser in [`crate::parsing`] expects.

use std::fmt::Write as _;

use crate::context::{LearningStyle, UserLearningContext};

fn learner_profile(context: &UserLearningContext) -> String {
    let mut profile = format!(
        "Learner profile: skill level {:?}, level {}, prefers {} material.",
        context.skill_level,
        context.current_level,
        match context.preferred_learning_style {
            LearningStyle::Visual => "visual",
            LearningStyle::Textual => "textual",
            LearningStyle::Mixed => "mixed",
        }
    );
    if !context.weak_areas.is_empty() {
        let _ = write!(profile, " Struggles with: {}.", context.weak_areas.join(", "));
    }
    if !context.strong_areas.is_empty() {
        let _ = write!(profile, " Strong in: {}.", context.strong_areas.join(", "));
    }
    profile
}

/// Prompt for a concept explanation.
#[must_use]
pub fn explanation(concept: &str, context: &UserLearningContext) -> String {
    format!(
        "{}\nExplain the smart-contract concept \"{concept}\" clearly and concisely for this learner. \
         Respond with plain text.",
        learner_profile(context)
    )
}

/// Prompt for a personalised challenge.
#[must_use]
pub fn challenge(topic: &str, difficulty: u8, context: &UserLearningContext) -> String {
    format!(
        "{}\nCreate a Solidity coding challenge on \"{topic}\" at difficulty {difficulty} out of 10. \
         Respond with a JSON object with keys: title, description, difficulty (1-10), \
         starterCode, hints (array of strings), learningObjectives (array of strings).",
        learner_profile(context)
    )
}

/// Prompt for a security analysis.
#[must_use]
pub fn security_analysis(code: &str) -> String {
    format!(
        "Audit the following Solidity code. Respond with a JSON object with keys: \
         overallScore (0-100, higher is safer), vulnerabilities (array of objects with \
         severity, title, description, line, recommendation), gasOptimizations (array of \
         strings), bestPractices (array of strings).\n```solidity\n{code}\n```"
    )
}

/// Prompt for contract generation.
#[must_use]
pub fn contract(description: &str, requirements: &[String], context: &UserLearningContext) -> String {
    let mut prompt = format!(
        "{}\nWrite a Solidity smart contract: {description}",
        learner_profile(context)
    );
    if !requirements.is_empty() {
        prompt.push_str("\nRequirements:");
        for requirement in requirements {
            let _ = write!(prompt, "\n- {requirement}");
        }
    }
    prompt.push_str(
        "\nRespond with a JSON object with keys: code, explanation, securityConsiderations, \
         gasOptimizations, testSuggestions (the last three are arrays of strings).",
    );
    prompt
}

/// Prompt for a four-way explanation.
#[must_use]
pub fn multi_modal(concept: &str, context: &UserLearningContext) -> String {
    format!(
        "{}\nExplain \"{concept}\" four ways. Respond with a JSON object with keys: text \
         (prose explanation), diagram (Mermaid source), interactiveExample (an exercise the \
         learner can try), codeExample (short Solidity snippet).",
        learner_profile(context)
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::LearningConfig;

    #[test]
    fn test_profile_mentions_weak_areas() {
        let mut context = UserLearningContext::new("u1", &LearningConfig::default());
        context.weak_areas = vec!["reentrancy".to_string()];

        let prompt = challenge("reentrancy", 1, &context);
        assert!(prompt.contains("Struggles with: reentrancy."));
        assert!(prompt.contains("difficulty 1 out of 10"));
        assert!(prompt.contains("starterCode"));
    }

    #[test]
    fn test_contract_lists_requirements() {
        let context = UserLearningContext::new("u1", &LearningConfig::default());
        let prompt = contract(
            "an ERC-20 token",
            &["capped supply".to_string(), "pausable".to_string()],
            &context,
        );
        assert!(prompt.contains("- capped supply\n- pausable"));
    }

    #[test]
    fn test_security_prompt_embeds_code() {
        let prompt = security_analysis("contract A {}");
        assert!(prompt.contains("```solidity\ncontract A {}\n```"));
    }
}

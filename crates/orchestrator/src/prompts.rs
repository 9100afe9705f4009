use council_core::{AxiomSet, Candidate, CompatibilityReport, Stage, VoteOutcome};

pub const SYNTHESIZER_SYSTEM: &str = "You are the synthesizer of an AI council. You read every \
worker's proposal, find gaps and tensions, and turn the debate into clear, comparable options. \
You are neutral: you never argue for one worker over another.";

/// A labelled piece of text from one worker slot.
pub struct Contribution<'a> {
    pub slot_id: &'a str,
    pub persona: &'a str,
    pub text: &'a str,
}

fn contributions(items: &[Contribution<'_>]) -> String {
    if items.is_empty() {
        return "(none)".to_string();
    }
    items
        .iter()
        .map(|c| format!("[{} - {}]\n{}", c.slot_id, c.persona, c.text.trim()))
        .collect::<Vec<_>>()
        .join("\n\n")
}

fn bullets(items: &[String]) -> String {
    if items.is_empty() {
        return "(none)".to_string();
    }
    items
        .iter()
        .map(|i| format!("- {}", i))
        .collect::<Vec<_>>()
        .join("\n")
}

fn guidance(text: Option<&str>) -> String {
    match text {
        Some(t) => format!("\nUSER GUIDANCE FOR YOU:\n{}\nAddress this directly.\n", t.trim()),
        None => String::new(),
    }
}

pub struct CouncilPrompts;

impl CouncilPrompts {
    pub fn draft(prompt: &str) -> String {
        format!(
            r#"You are tasked with providing a thoughtful response to the following prompt.

USER PROMPT:
{prompt}

Provide your response in the following JSON format:
{{
    "summary": "Your main proposal/answer (max 150 words)",
    "key_assumptions": ["assumption 1", "assumption 2"],
    "strengths": ["strength 1", "strength 2"],
    "risks": ["risk 1", "risk 2"],
    "confidence": 0.0 to 1.0
}}

Be concise and structured. Focus on your unique perspective."#,
            prompt = prompt.trim()
        )
    }

    pub fn refine(
        prompt: &str,
        current: &str,
        history: &[String],
        questions: &[String],
        user_guidance: Option<&str>,
    ) -> String {
        format!(
            r#"Review your previous work and answer the synthesizer's questions.

USER PROMPT:
{prompt}

YOUR EARLIER ROUNDS:
{history}

CURRENT PROPOSAL:
{current}

NEW QUESTIONS TO ADDRESS:
{questions}
{guidance}
Build on your previous thinking; do not start from scratch.

Respond in JSON format:
{{
    "summary": "Your revised proposal (max 150 words)",
    "answers_to_questions": {{"question": "direct answer"}},
    "patch_notes": ["Concrete change and why"],
    "new_risks": ["New risk introduced by changes"],
    "new_tradeoffs": ["New tradeoff introduced by changes"],
    "confidence": 0.0 to 1.0
}}"#,
            prompt = prompt.trim(),
            history = bullets(history),
            current = current.trim(),
            questions = bullets(questions),
            guidance = guidance(user_guidance),
        )
    }

    pub fn diversify(current: &str, others: &[Contribution<'_>]) -> String {
        format!(
            r#"You are part of a council of workers. Here are the other workers' proposals:

OTHER WORKERS' PROPOSALS:
{others}

YOUR CURRENT PROPOSAL:
{current}

Differentiate your approach. Look for gaps, alternative perspectives, or angles the others have not explored.

Respond in JSON format:
{{
    "summary": "Your differentiated proposal (max 150 words)",
    "key_assumptions": ["assumption 1"],
    "strengths": ["strength 1"],
    "risks": ["risk 1"],
    "confidence": 0.0 to 1.0,
    "differentiation": "How your approach differs from the others"
}}"#,
            others = contributions(others),
            current = current.trim(),
        )
    }

    pub fn collaborate(
        current: &str,
        others: &[Contribution<'_>],
        report: Option<&CompatibilityReport>,
        user_guidance: Option<&str>,
    ) -> String {
        let (overlap, strategy) = match report {
            Some(r) => (
                bullets(&r.overlap_areas),
                r.merge_strategy.clone().unwrap_or_default(),
            ),
            None => ("(none)".to_string(), String::new()),
        };
        format!(
            r#"[COLLABORATION PHASE]

YOUR CURRENT PROPOSAL:
{current}

COMPATIBLE PROPOSALS FROM OTHER WORKERS:
{others}

AREAS OF OVERLAP:
{overlap}

MERGE STRATEGY: {strategy}
{guidance}
Actively collaborate: take concrete mechanisms from the others, resolve trade-offs, and state what is new.

Respond in JSON:
{{
    "collaborative_summary": "Your evolved proposal",
    "specific_improvements": ["Specific change with reasoning"],
    "integrated_mechanisms": {{"worker_X": "Mechanism integrated"}},
    "resolved_tensions": ["How a conflict was resolved"],
    "new_insights": ["Insight that emerged"],
    "confidence": 0.0 to 1.0
}}"#,
            current = current.trim(),
            others = contributions(others),
            overlap = overlap,
            strategy = strategy,
            guidance = guidance(user_guidance),
        )
    }

    pub fn argue(
        proposal: &str,
        alternatives: &[Contribution<'_>],
        counter_arguments: &[Contribution<'_>],
        user_guidance: Option<&str>,
    ) -> String {
        let counter = if counter_arguments.is_empty() {
            String::new()
        } else {
            format!(
                "\nPREVIOUS ARGUMENTS FROM OTHER WORKERS:\n{}\nRespond to their points directly.\n",
                contributions(counter_arguments)
            )
        };
        format!(
            r#"Make your case for why your proposal is the best solution.

YOUR PROPOSAL:
{proposal}

OTHER PROPOSALS:
{alternatives}
{counter}{guidance}
Evaluation criteria: correctness, feasibility, risk, and fit to the user's prompt.

Respond in JSON format:
{{
    "main_argument": "Your core argument (2-3 sentences)",
    "key_strengths": ["strength 1"],
    "critique_of_alternatives": "Brief critique of other proposals",
    "rubric_alignment": "How your proposal meets the criteria",
    "user_feedback_addressed": "How you addressed the user's feedback, if any"
}}"#,
            proposal = proposal.trim(),
            alternatives = contributions(alternatives),
            counter = counter,
            guidance = guidance(user_guidance),
        )
    }

    pub fn worker_axioms(proposal: &str, persona: &str, discussion: &[String]) -> String {
        format!(
            r#"Reflect on the AXIOMS underlying your final position.

YOUR FINAL PROPOSAL:
{proposal}

YOUR PERSONA: {persona}

DISCUSSION SUMMARY:
{discussion}

Identify the fundamental assumptions and principles your proposal rests on.

Respond in JSON format:
{{
    "axioms": [
        {{
            "statement": "A fundamental principle or assumption",
            "axiom_type": "core|derived|assumption|parameter",
            "confidence": 0.0 to 1.0,
            "vulnerability": "What would invalidate this axiom",
            "potential_biases": ["Bias that might affect it"]
        }}
    ],
    "theory_contribution": "How your axioms contribute to a general theory"
}}"#,
            proposal = proposal.trim(),
            persona = persona,
            discussion = bullets(discussion),
        )
    }

    pub fn questions(prompt: &str, proposals: &[Contribution<'_>]) -> String {
        format!(
            r#"The user asked:
{prompt}

WORKER PROPOSALS:
{proposals}

For each worker, ask 1-3 pointed questions that expose gaps, untested assumptions, or missing details.

Respond in JSON format:
{{
    "questions_by_worker": {{
        "worker_1": ["question 1", "question 2"]
    }},
    "overall_observations": "Brief observation about the proposals as a whole"
}}"#,
            prompt = prompt.trim(),
            proposals = contributions(proposals),
        )
    }

    pub fn follow_up(prompt: &str, refinements: &[Contribution<'_>], feedback: &[String]) -> String {
        format!(
            r#"The user asked:
{prompt}

LATEST REFINEMENTS:
{refinements}

USER FEEDBACK SO FAR:
{feedback}

Ask each worker 1-2 follow-up questions about what is still weak or unresolved.

Respond in JSON format:
{{
    "questions_by_worker": {{
        "worker_id": ["question1", "question2"]
    }},
    "overall_observations": "Patterns or gaps across all refinements"
}}"#,
            prompt = prompt.trim(),
            refinements = contributions(refinements),
            feedback = bullets(feedback),
        )
    }

    pub fn compatibility(prompt: &str, proposals: &[Contribution<'_>]) -> String {
        format!(
            r#"The user asked:
{prompt}

REFINED PROPOSALS:
{proposals}

Decide whether these proposals can be merged.

Respond in JSON format:
{{
    "compatibility": "compatible|partially_compatible|incompatible",
    "overlap_areas": ["area 1"],
    "conflict_areas": ["conflict 1"],
    "merge_strategy": "How to combine them, or null if incompatible"
}}"#,
            prompt = prompt.trim(),
            proposals = contributions(proposals),
        )
    }

    pub fn candidates(
        prompt: &str,
        proposals: &[Contribution<'_>],
        report: Option<&CompatibilityReport>,
    ) -> String {
        let verdict = report
            .map(|r| r.verdict.as_str())
            .unwrap_or("incompatible");
        format!(
            r#"The user asked:
{prompt}

FINAL WORKER PROPOSALS:
{proposals}

COMPATIBILITY VERDICT: {verdict}

Synthesize 2-4 distinct candidate solutions. Merge proposals that agree; keep real alternatives separate.

Respond in JSON format:
{{
    "candidates": [
        {{
            "id": "candidate_1",
            "source_workers": ["worker_1", "worker_2"],
            "summary": "Clear summary of this approach",
            "best_use_case": "When this approach works best",
            "trade_offs": ["trade-off 1"],
            "failure_modes": ["failure mode 1"]
        }}
    ]
}}"#,
            prompt = prompt.trim(),
            proposals = contributions(proposals),
            verdict = verdict,
        )
    }

    pub fn commentary(stage: Stage, round: u32, outputs: &[Contribution<'_>]) -> String {
        format!(
            r#"Round {round} of {stage} just finished.

OUTPUTS:
{outputs}

In 2-4 sentences, tell the user what changed, where the workers agree, and what is still contested. Plain text, no JSON."#,
            round = round,
            stage = stage,
            outputs = contributions(outputs),
        )
    }

    pub fn score(prompt: &str, candidate: &Candidate, arguments: &[Contribution<'_>]) -> String {
        format!(
            r#"The user asked:
{prompt}

CANDIDATE {id}:
{summary}
Best use: {best_use}
Trade-offs:
{tradeoffs}
Failure modes:
{failures}

ARGUMENTS MADE DURING THE DEBATE:
{arguments}

Score this candidate from 0 to 10 for how well it answers the user.

Respond in JSON format:
{{
    "score": 0 to 10,
    "reasoning": "Explanation for the score"
}}"#,
            prompt = prompt.trim(),
            id = candidate.id,
            summary = candidate.summary,
            best_use = candidate.best_use,
            tradeoffs = bullets(&candidate.tradeoffs),
            failures = bullets(&candidate.failure_modes),
            arguments = contributions(arguments),
        )
    }

    pub fn user_axioms(prompt: &str, feedback: &[String]) -> String {
        format!(
            r#"The user asked:
{prompt}

EVERYTHING THE USER SAID DURING THE DEBATE:
{feedback}

Infer the user's own axioms: the values and assumptions behind their feedback.

Respond in JSON format:
{{
    "axioms": [
        {{
            "statement": "An assumption or value the user holds",
            "axiom_type": "core|derived|assumption|parameter",
            "confidence": 0.0 to 1.0
        }}
    ]
}}"#,
            prompt = prompt.trim(),
            feedback = bullets(feedback),
        )
    }

    pub fn axiom_network(prompt: &str, sets: &[AxiomSet]) -> String {
        let listing = sets
            .iter()
            .flat_map(|set| {
                set.axioms
                    .iter()
                    .map(move |a| format!("- [{}] {}", set.source.key(), a.statement))
            })
            .collect::<Vec<_>>()
            .join("\n");
        format!(
            r#"The user asked:
{prompt}

AXIOMS BY SOURCE:
{listing}

Identify meta-axioms that hold across sources, and pairs of statements that contradict each other.

Respond in JSON format:
{{
    "meta_axioms": ["A principle shared across sources"],
    "conflicts": [
        {{"statement_a": "exact statement", "statement_b": "exact statement", "reason": "why they conflict"}}
    ]
}}"#,
            prompt = prompt.trim(),
            listing = if listing.is_empty() { "(none)".to_string() } else { listing },
        )
    }

    pub fn final_answer(
        prompt: &str,
        winner: Option<&Candidate>,
        outcome: Option<&VoteOutcome>,
        feedback: &[String],
        meta_axioms: &[String],
    ) -> String {
        let decision = match (winner, outcome) {
            (Some(candidate), Some(outcome)) => format!(
                "WINNING CANDIDATE ({}): {}\n{}\nBest use: {}",
                outcome.reason.describe(),
                candidate.id,
                candidate.summary,
                candidate.best_use
            ),
            _ => "No candidate was selected. Build the answer from the user's feedback.".to_string(),
        };
        format!(
            r#"The user asked:
{prompt}

{decision}

USER FEEDBACK:
{feedback}

SHARED PRINCIPLES:
{meta}

Write the council's final answer for the user: the recommendation, how to act on it, and the main risks. Plain text, no JSON."#,
            prompt = prompt.trim(),
            decision = decision,
            feedback = bullets(feedback),
            meta = bullets(meta_axioms),
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_refine_includes_guidance_only_when_given() {
        let with = CouncilPrompts::refine("p", "cur", &[], &["why?".to_string()], Some("Add cost"));
        assert!(with.contains("USER GUIDANCE FOR YOU:\nAdd cost"));
        assert!(with.contains("- why?"));

        let without = CouncilPrompts::refine("p", "cur", &[], &[], None);
        assert!(!without.contains("USER GUIDANCE"));
        assert!(without.contains("(none)"));
    }

    #[test]
    fn test_contributions_are_labelled() {
        let others = [Contribution {
            slot_id: "worker_2",
            persona: "The Skeptic",
            text: "Use a queue",
        }];
        let prompt = CouncilPrompts::diversify("mine", &others);
        assert!(prompt.contains("[worker_2 - The Skeptic]\nUse a queue"));
    }

    #[test]
    fn test_final_answer_without_winner() {
        let prompt = CouncilPrompts::final_answer("p", None, None, &["[overall] cheaper".into()], &[]);
        assert!(prompt.contains("No candidate was selected"));
        assert!(prompt.contains("- [overall] cheaper"));
    }
}

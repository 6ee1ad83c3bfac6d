//! Judge prompts for the grading metrics.
//!
//! Templates use `{name}` placeholders filled by [`Prompts::fill`] in one
//! pass, so braces inside inserted text are never expanded.

use regex::{Captures, Regex};
use std::sync::LazyLock;

static PLACEHOLDER: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\{([a-z_]+)\}").expect("valid placeholder pattern"));

/// Collection of prompts used for grading.
pub struct Prompts;

impl Prompts {
    /// Substitute `{name}` placeholders from `values`; unknown names are kept.
    pub fn fill(template: &str, values: &[(&str, &str)]) -> String {
        PLACEHOLDER
            .replace_all(template, |caps: &Captures| {
                let name = &caps[1];
                values
                    .iter()
                    .find(|(key, _)| *key == name)
                    .map(|(_, value)| value.to_string())
                    .unwrap_or_else(|| caps[0].to_string())
            })
            .into_owned()
    }

    /// Ask whether a claim is supported by retrieved evidence.
    pub fn factuality_verdict() -> &'static str {
        r#"Given the following relevant source materials and an atomic claim, determine if the claim is factually supported by the sources.

Relevant Source Materials:
{evidence}

Atomic Claim: {claim}

Please analyze if this claim is:
1. Directly supported by the source materials
2. Can be reasonably inferred from the source materials
3. Contradicted by the source materials
4. Not mentioned or supported by the source materials

All key factual details (numbers, dates, names, percentages) must be present in at least one source. Different wording is acceptable when the meaning is preserved. A claim that contradicts any source, or adds specifics no source contains, is not supported.

Respond with either "FACTUAL" if the claim is supported (directly or through reasonable inference) or "UNFACTUAL" if it is contradicted or not supported.
Then provide a brief explanation.

Format your response as:
VERDICT: [FACTUAL/UNFACTUAL]
EXPLANATION: [brief explanation]"#
    }

    /// Stricter variant used after a reply without a readable verdict.
    pub fn factuality_verdict_strict() -> &'static str {
        r#"Given the following relevant source materials and an atomic claim, determine if the claim is factually supported by the sources.

Relevant Source Materials:
{evidence}

Atomic Claim: {claim}

- All key factual details (numbers, dates, names, percentages) must be present in at least one source
- Different wording or paraphrasing is acceptable if the meaning is preserved
- Answer UNFACTUAL if important details are missing, incorrect, or contradicted by any source

EXAMPLES:
Source: "Company ABC reported $50M revenue in Q3 2023, 15% growth" / Claim: "ABC's revenue grew 15% to $50M" -> VERDICT: FACTUAL
Source: "ABC saw a 10% decline this quarter" / Claim: "ABC's revenue grew 15%" -> VERDICT: UNFACTUAL

IMPORTANT: You must respond in the exact format below. Do not add any other text.

VERDICT: FACTUAL
EXPLANATION: Your explanation naming the sources that support or contradict the claim

Replace FACTUAL with UNFACTUAL if the claim is not supported."#
    }

    /// Ask which report insight, if any, answers a gold question.
    pub fn insight_scoring() -> &'static str {
        r#"You are evaluating whether a research report contains a specific insight.

Below is the numbered list of insights extracted from the report:
{claims_text}

Question: {question}
Expected answer (gold insight): {gold_insight}

Select the ONE insight from the list that best answers the question, then decide whether it conveys the same information as the expected answer. Key facts (numbers, dates, names, percentages) must agree; wording may differ. If no insight answers the question, answer "no" and leave selected_insight empty.

Respond in JSON format:
{
    "answer": "<yes or no>",
    "justification": "<brief explanation comparing the selected insight with the expected answer>",
    "confidence": <integer from 1 to 10>,
    "selected_insight": "<the exact text of the selected insight, or an empty string>"
}

Respond with only the JSON, no other text."#
    }

    /// Rubric prompt: five criteria, each as a tagged score/justification block.
    pub fn report_quality() -> &'static str {
        r#"You are a Deep Research Evaluator.

You are given:
1. A research report.
2. A deep research (DR) question that the report attempts to answer.
3. A persona that represents the intended audience for the report.

------------------
<persona>
{persona}
</persona>

<dr_question>
{dr_question}
</dr_question>

<report>
{report}
</report>
------------------

## Instructions:

**ANALYZE THOROUGHLY**: Examine the report in detail and identify any issues, even small ones.

Evaluate the report according to the five criteria listed below. For **each criterion**, provide:

- A **score between 1 and 10** (must be an integer) using the scale defined below.
- A **detailed justification** (2-3 sentences) in simple plain English explaining why you gave that score.

### Scoring Scale (1-10, integers only):
- **1-2** = Very poor, major deficiencies
- **3-4** = Poor, significant problems
- **5-6** = Average, meets basic requirements but has notable issues
- **7-8** = Good, meets expectations with minor issues
- **9-10** = Excellent, minimal or no issues

### Criteria:
1. **Depth & Quality of Analysis**: How far the report delves into the details of the question, explores multiple factors, and reveals non-obvious findings.
2. **Relevance To DR Question**: How directly the report addresses the question and whether its recommendations act on it.
3. **Persona Consistency**: How well tone, language and approach fit the persona's goals and expertise.
4. **Coherence & Conciseness**: Whether information flows logically with clear connections and without needless jargon.
5. **Degree of Contradictions**: Whether the report is free of internal inconsistencies or conflicting statements (10 = no contradictions).

------------------

## Output format:

<evaluation>
<depth_quality>
    <score>1-10</score>
    <justification>2-3 sentence justification.</justification>
</depth_quality>

<relevance_to_question>
    <score>1-10</score>
    <justification>2-3 sentence justification.</justification>
</relevance_to_question>

<persona_consistency>
    <score>1-10</score>
    <justification>2-3 sentence justification.</justification>
</persona_consistency>

<coherence_conciseness>
    <score>1-10</score>
    <justification>2-3 sentence justification.</justification>
</coherence_conciseness>

<contradictions>
    <score>1-10</score>
    <justification>2-3 sentence justification.</justification>
</contradictions>
</evaluation>"#
    }

    /// Rubric prompt with a filled-in example, used on retries.
    pub fn report_quality_strict() -> &'static str {
        r#"You are a Deep Research Evaluator.

------------------
<persona>
{persona}
</persona>

<dr_question>
{dr_question}
</dr_question>

<report>
{report}
</report>
------------------

IMPORTANT: You MUST respond in the EXACT format shown below. Do not add any extra text.

Evaluate the report on these 5 criteria (score each from 1 to 10 as integers):
1. Depth & Quality of Analysis
2. Relevance To DR Question
3. Persona Consistency
4. Coherence & Conciseness
5. Degree of Contradictions

**Scoring Scale**: 1-2=Very poor, 3-4=Poor, 5-6=Average, 7-8=Good, 9-10=Excellent

Format your response EXACTLY as:

<evaluation>
<depth_quality>
<score>8</score>
<justification>Your justification here with specific issues or strengths identified</justification>
</depth_quality>
<relevance_to_question>
<score>7</score>
<justification>Your justification here with specific issues or strengths identified</justification>
</relevance_to_question>
<persona_consistency>
<score>6</score>
<justification>Your justification here with specific issues or strengths identified</justification>
</persona_consistency>
<coherence_conciseness>
<score>9</score>
<justification>Your justification here with specific issues or strengths identified</justification>
</coherence_conciseness>
<contradictions>
<score>8</score>
<justification>Your justification here with specific issues or strengths identified</justification>
</contradictions>
</evaluation>"#
    }
}

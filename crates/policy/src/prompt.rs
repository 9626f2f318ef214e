//! Prompt construction and proof extraction per model family.
//!
//! Each [`PromptStyle`] knows how to turn a theorem into the text sent to
//! the inference server and how to pull a checkable Lean program back out
//! of the raw completion. Styles are a closed set selected by model id.

use serde::{Deserialize, Serialize};

/// Preamble used when a problem does not carry its own header.
pub const DEFAULT_HEADER: &str = "import Mathlib\nimport Aesop\n\nset_option maxHeartbeats 0\n\nopen BigOperators Real Nat Topology Rat\n\n";

const PLAN_INSTRUCTION: &str = "Before producing the Lean 4 code to formally prove the given theorem, \
provide a detailed proof plan outlining the main proof steps and strategies.";

const PLAN_DETAIL: &str = "The plan should highlight key ideas, intermediate lemmas, and proof \
structures that will guide the construction of the final formal proof.";

/// Prompt family, one per supported prover model.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum PromptStyle {
    /// Plan-then-code chat prompt with an optional natural-language proof.
    #[default]
    Default,
    /// DeepSeek-Prover-V2: informal statement as a doc comment, optional CoT suffix.
    DeepSeekV2,
    /// DeepSeek-Prover-V1.5 completion with explanatory comments.
    DeepSeekV15Cot,
    /// DeepSeek-Prover-V1.5 plain completion.
    DeepSeekV15NonCot,
    /// Goedel-Prover (ChatML template).
    Goedel,
}

impl PromptStyle {
    /// Select the prompt style for a model id.
    pub fn for_model(model_id: &str) -> Self {
        match model_id {
            "deepseek-prover-v15-cot" => PromptStyle::DeepSeekV15Cot,
            "deepseek-prover-v15-noncot" => PromptStyle::DeepSeekV15NonCot,
            id if id.contains("Goedel") => PromptStyle::Goedel,
            id if id.contains("DeepSeek-Prover-V2") => PromptStyle::DeepSeekV2,
            _ => PromptStyle::Default,
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            PromptStyle::Default => "default",
            PromptStyle::DeepSeekV2 => "deep-seek-v2",
            PromptStyle::DeepSeekV15Cot => "deep-seek-v15-cot",
            PromptStyle::DeepSeekV15NonCot => "deep-seek-v15-non-cot",
            PromptStyle::Goedel => "goedel",
        }
    }

    /// V1.5 styles continue the Lean code directly instead of answering a chat turn.
    pub fn is_completion(&self) -> bool {
        matches!(
            self,
            PromptStyle::DeepSeekV15Cot | PromptStyle::DeepSeekV15NonCot
        )
    }
}

impl std::fmt::Display for PromptStyle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.name())
    }
}

/// Everything needed to prompt for and parse one problem.
#[derive(Debug, Clone, PartialEq)]
pub struct PromptConfig {
    pub style: PromptStyle,
    pub formal_statement: String,
    pub header: String,
    pub informal_statement: Option<String>,
    pub nl_proof: Option<String>,
    /// Extra reasoning text appended to DeepSeek-V2 prompts.
    pub cot: Option<String>,
}

impl PromptConfig {
    pub fn new(
        style: PromptStyle,
        formal_statement: impl Into<String>,
        header: impl Into<String>,
    ) -> Self {
        Self {
            style,
            formal_statement: formal_statement.into(),
            header: header.into(),
            informal_statement: None,
            nl_proof: None,
            cot: None,
        }
    }

    pub fn with_informal_statement(mut self, informal: Option<String>) -> Self {
        self.informal_statement = informal;
        self
    }

    pub fn with_nl_proof(mut self, nl_proof: Option<String>) -> Self {
        self.nl_proof = nl_proof;
        self
    }

    pub fn with_cot(mut self, cot: Option<String>) -> Self {
        self.cot = cot;
        self
    }

    /// Program preamble the candidate is checked against.
    pub fn header(&self) -> &str {
        if self.header.trim().is_empty() {
            DEFAULT_HEADER
        } else {
            &self.header
        }
    }

    /// The user message (or completion prefix) for this problem.
    pub fn build(&self) -> String {
        match self.style {
            PromptStyle::Default => self.build_default(),
            PromptStyle::DeepSeekV2 => self.build_deepseek_v2(),
            PromptStyle::DeepSeekV15Cot => self.build_v15(true),
            PromptStyle::DeepSeekV15NonCot => self.build_v15(false),
            PromptStyle::Goedel => self.build_goedel(),
        }
    }

    /// The full text sent to the inference server, with the model's chat
    /// template applied.
    pub fn render(&self) -> String {
        let message = self.build();
        match self.style {
            PromptStyle::Default | PromptStyle::DeepSeekV2 => format_deepseek_chat(&message),
            PromptStyle::Goedel => format_chatml(&message),
            PromptStyle::DeepSeekV15Cot | PromptStyle::DeepSeekV15NonCot => message,
        }
    }

    /// Extract the candidate proof from a raw model completion.
    pub fn parse(&self, raw_output: &str) -> String {
        if self.style.is_completion() {
            return self.parse_completion(raw_output);
        }
        extract_last_lean_block(raw_output).unwrap_or_else(|| raw_output.trim().to_string())
    }

    fn build_default(&self) -> String {
        let statement = statement_with_sorry(&self.formal_statement);
        let proof_block = match non_empty(self.nl_proof.as_deref()) {
            Some(nl) => format!("\n\nThe English proof is as follows:\n```text\n{nl}\n```"),
            None => String::new(),
        };
        format!(
            "Complete the following Lean 4 code:\n\n```lean4\n{}\n\n{statement}\n```\n{proof_block}\n\n{PLAN_INSTRUCTION}",
            self.header
        )
        .trim()
        .to_string()
    }

    fn build_deepseek_v2(&self) -> String {
        let header = self.header().trim();
        let mut body = Vec::new();
        if let Some(informal) = non_empty(self.informal_statement.as_deref()) {
            let single_line = informal.lines().collect::<Vec<_>>().join(" ");
            body.push(format!("/-- {single_line}-/"));
        }
        let statement = statement_with_sorry(&self.formal_statement);
        if !statement.is_empty() {
            body.push(statement);
        }
        let body = body.join("\n");

        let code = match (header.is_empty(), body.is_empty()) {
            (true, _) => body,
            (false, true) => header.to_string(),
            (false, false) => format!("{header}\n\n{body}"),
        };

        let mut prompt = format!(
            "Complete the following Lean 4 code:\n\n```lean4\n{code}\n```\n\n{PLAN_INSTRUCTION}\n{PLAN_DETAIL}"
        );
        if let Some(cot) = non_empty(self.cot.as_deref()) {
            prompt = format!("{prompt}\n\n{cot}");
        }
        prompt
    }

    fn build_v15(&self, cot: bool) -> String {
        let instruction = if cot {
            "Complete the following Lean 4 code with explanatory comments preceding each line of code:"
        } else {
            "Complete the following Lean 4 code:"
        };
        let informal = match non_empty(self.informal_statement.as_deref()) {
            Some(text) => format!("/-- {text}-/\n"),
            None => String::new(),
        };
        format!(
            "{instruction}\n\n```lean4\n{}{informal}{}",
            self.header(),
            statement_without_sorry(&self.formal_statement)
        )
    }

    fn build_goedel(&self) -> String {
        let statement = statement_with_sorry(&self.formal_statement);
        let proof_block = match non_empty(self.nl_proof.as_deref()) {
            Some(nl) => format!("\n\nThe English proof is as follows:\n```text\n{nl}\n```"),
            None => String::new(),
        };
        format!(
            "Complete the following Lean 4 code:\n\n```lean4\n{}{statement}```{proof_block}\n\n{PLAN_INSTRUCTION}\n{PLAN_DETAIL}",
            self.header()
        )
    }

    /// Completion styles produce the proof body only: glue it to the
    /// statement and cut at the closing fence.
    fn parse_completion(&self, raw_output: &str) -> String {
        if let Some(block) = extract_last_lean_block(raw_output) {
            return block;
        }
        let body = match raw_output.find("```") {
            Some(end) => &raw_output[..end],
            None => raw_output,
        };
        let statement = statement_without_sorry(&self.formal_statement);
        format!("{statement}{}", body.trim_end())
    }
}

/// Wrap a user message in the DeepSeek chat template.
pub fn format_deepseek_chat(message: &str) -> String {
    // <｜begin▁of▁sentence｜><｜User｜>{message}<｜Assistant｜>
    format!(
        "<\u{ff5c}begin\u{2581}of\u{2581}sentence\u{ff5c}>\
         <\u{ff5c}User\u{ff5c}>{message}\
         <\u{ff5c}Assistant\u{ff5c}>"
    )
}

/// Wrap a user message in the ChatML template used by Qwen-based provers.
pub fn format_chatml(message: &str) -> String {
    format!("<|im_start|>user\n{message}<|im_end|>\n<|im_start|>assistant\n")
}

/// Content of the last complete ```` ```lean4 ```` block, trimmed.
pub fn extract_last_lean_block(text: &str) -> Option<String> {
    const OPEN: &str = "```lean4";
    const CLOSE: &str = "```";

    let mut last = None;
    let mut rest = text;
    while let Some(start) = rest.find(OPEN) {
        let after_open = &rest[start + OPEN.len()..];
        let Some(end) = after_open.find(CLOSE) else {
            break;
        };
        last = Some(after_open[..end].trim().to_string());
        rest = &after_open[end + CLOSE.len()..];
    }
    last
}

fn statement_with_sorry(statement: &str) -> String {
    let statement = statement.trim();
    if statement.is_empty() || statement.ends_with("sorry") {
        statement.to_string()
    } else {
        format!("{statement}\n  sorry")
    }
}

fn statement_without_sorry(statement: &str) -> &str {
    let trimmed = statement.trim_end();
    match trimmed.strip_suffix("sorry") {
        Some(rest) => rest.trim_end_matches([' ', '\t']),
        None => statement,
    }
}

fn non_empty(text: Option<&str>) -> Option<&str> {
    text.map(str::trim).filter(|t| !t.is_empty())
}

//! Rules and rulesets attached to prompts and image requests.

/// A single natural-language rule.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Rule {
    pub value: String,
}

impl Rule {
    pub fn new(value: impl Into<String>) -> Self {
        Self {
            value: value.into(),
        }
    }
}

/// A named group of rules.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Ruleset {
    pub name: String,
    pub rules: Vec<Rule>,
}

impl Ruleset {
    pub fn new(name: impl Into<String>, rules: Vec<Rule>) -> Self {
        Self {
            name: name.into(),
            rules,
        }
    }

    /// Rule values in declaration order.
    pub fn values(&self) -> impl Iterator<Item = &str> {
        self.rules.iter().map(|r| r.value.as_str())
    }

    /// Render as a prompt section: the name followed by one rule per line.
    pub fn to_prompt_section(&self) -> String {
        let mut out = format!("Ruleset name: {}\n", self.name);
        for rule in &self.rules {
            out.push_str(&rule.value);
            out.push('\n');
        }
        out
    }
}

//! Specialist agents and keyword features

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use crate::backend::InvocationParams;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Agent {
    Market,
    Operations,
    Financial,
    Leadgen,
    ResearchSynthesis,
}

impl Agent {
    pub const ALL: [Agent; 5] = [
        Agent::Market,
        Agent::Operations,
        Agent::Financial,
        Agent::Leadgen,
        Agent::ResearchSynthesis,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Agent::Market => "market",
            Agent::Operations => "operations",
            Agent::Financial => "financial",
            Agent::Leadgen => "leadgen",
            Agent::ResearchSynthesis => "research_synthesis",
        }
    }

    /// Phrases that mark a query as this agent's business
    pub fn keywords(&self) -> &'static [&'static str] {
        match self {
            Agent::Market => &[
                "market",
                "competition",
                "competitor",
                "industry",
                "trend",
                "customer segment",
                "target audience",
            ],
            Agent::Operations => &[
                "process",
                "efficiency",
                "workflow",
                "operation",
                "optimize",
                "automate",
                "scale",
                "bottleneck",
            ],
            Agent::Financial => &[
                "financial",
                "revenue",
                "cost",
                "profit",
                "roi",
                "budget",
                "pricing",
                "investment",
                "money",
            ],
            Agent::Leadgen => &[
                "lead",
                "customer acquisition",
                "growth",
                "sales",
                "marketing",
                "funnel",
                "conversion",
                "acquire",
            ],
            Agent::ResearchSynthesis => &[
                "research",
                "study",
                "studies",
                "evidence",
                "literature",
                "academic",
                "paper",
            ],
        }
    }

    fn instructions(&self) -> &'static str {
        match self {
            Agent::Market => {
                "You are a market analysis specialist. Assess market size, trends, \
                 competitors and customer segments, and support claims with evidence."
            }
            Agent::Operations => {
                "You are an operations audit specialist. Find process bottlenecks and \
                 propose concrete efficiency improvements with expected impact."
            }
            Agent::Financial => {
                "You are a financial modeling specialist. Build explicit projections, \
                 show calculations step by step and state every assumption."
            }
            Agent::Leadgen => {
                "You are a lead generation specialist. Design customer acquisition \
                 strategies and funnel improvements with measurable targets."
            }
            Agent::ResearchSynthesis => {
                "You are a research synthesis specialist. Combine the supplied research \
                 into evidence-backed recommendations and cite the sources you rely on."
            }
        }
    }

    /// Sampling parameters tuned per agent
    pub fn params(&self) -> InvocationParams {
        let (temperature, max_tokens) = match self {
            Agent::Financial => (0.0, 8000),
            Agent::Market => (1.3, 4000),
            Agent::Operations => (1.0, 4000),
            Agent::Leadgen => (1.3, 4000),
            Agent::ResearchSynthesis => (1.0, 32000),
        };
        InvocationParams {
            temperature,
            max_tokens,
            system_prompt: Some(self.instructions().to_string()),
        }
    }
}

impl fmt::Display for Agent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Agent {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "market" | "market_analysis" => Ok(Agent::Market),
            "operations" | "operations_audit" => Ok(Agent::Operations),
            "financial" | "financial_modeling" => Ok(Agent::Financial),
            "leadgen" | "lead_generation" => Ok(Agent::Leadgen),
            "research_synthesis" | "research" => Ok(Agent::ResearchSynthesis),
            other => Err(format!("unknown agent: {}", other)),
        }
    }
}

/// Keyword matches per agent, in [`Agent::ALL`] order
pub fn keyword_matches(query: &str) -> Vec<(Agent, usize)> {
    let lowered = query.to_lowercase();
    Agent::ALL
        .iter()
        .map(|agent| {
            let hits = agent.keywords().iter().filter(|k| lowered.contains(*k)).count();
            (*agent, hits)
        })
        .collect()
}

/// Lead agent and the share of matched features attributable to it
pub fn classify(query: &str) -> Option<(Agent, f64)> {
    let matches = keyword_matches(query);
    let total: usize = matches.iter().map(|(_, hits)| hits).sum();
    if total == 0 {
        return None;
    }

    // Ties resolve to the earlier agent.
    let (lead, hits) = matches
        .into_iter()
        .fold((Agent::Market, 0), |best, cur| if cur.1 > best.1 { cur } else { best });
    Some((lead, hits as f64 / total as f64))
}

/// Params for queries no agent claims
pub fn general_params() -> InvocationParams {
    InvocationParams {
        system_prompt: Some(
            "You are a business intelligence analyst. Answer with a concise executive \
             summary followed by prioritized, actionable recommendations."
                .to_string(),
        ),
        ..InvocationParams::default()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_single_agent_query() {
        let (agent, confidence) = classify("What is our profit margin and ROI?").unwrap();
        assert_eq!(agent, Agent::Financial);
        assert_eq!(confidence, 1.0);
    }

    #[test]
    fn test_mixed_query_confidence_is_share() {
        // market: market + competitor; financial: pricing
        let (agent, confidence) = classify("market pricing versus each competitor").unwrap();
        assert_eq!(agent, Agent::Market);
        assert!((confidence - 2.0 / 3.0).abs() < 1e-9);
    }

    #[test]
    fn test_unclassified_query() {
        assert!(classify("hello there").is_none());
    }

    #[test]
    fn test_agent_params() {
        let financial = Agent::Financial.params();
        assert_eq!(financial.temperature, 0.0);
        assert_eq!(financial.max_tokens, 8000);
        assert_eq!(Agent::ResearchSynthesis.params().max_tokens, 32000);
        assert_eq!(general_params().max_tokens, 4000);
    }

    #[test]
    fn test_agent_parse_aliases() {
        assert_eq!("lead_generation".parse::<Agent>().unwrap(), Agent::Leadgen);
        assert_eq!("Market".parse::<Agent>().unwrap(), Agent::Market);
        assert!("astrology".parse::<Agent>().is_err());
    }
}

// output formatting for `check` - readable text or raw json

use crate::core::{PolicyConfig, Verdict};

pub struct Output;

impl Output {
    // for humans
    pub fn pretty(verdict: &Verdict) {
        let status = if verdict.is_safe { "allowed" } else { "denied" };
        println!("verdict: {status}");
        println!("reason:  {}", verdict.reason);
        if let Some(kind) = verdict.statement_type {
            println!("type:    {kind}");
        }
        println!("detail:  {}", verdict.detail);
    }

    // for scripts
    pub fn raw(verdict: &Verdict) -> Result<(), crate::Error> {
        println!("{}", serde_json::to_string(verdict)?);
        Ok(())
    }

    pub fn policy(policy: &PolicyConfig) -> Result<(), crate::Error> {
        let text = toml::to_string_pretty(policy)
            .map_err(|e| crate::Error::Config(format!("could not render policy: {e}")))?;
        print!("{text}");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::validate;

    #[test]
    fn test_raw_and_policy_render() {
        let policy = PolicyConfig::default();
        assert!(Output::raw(&validate("SELECT 1", &policy)).is_ok());
        assert!(Output::policy(&policy).is_ok());
    }
}

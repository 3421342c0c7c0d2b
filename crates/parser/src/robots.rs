//! Minimal robots.txt parser: user-agent groups with allow/disallow rules
//! (longest match wins, allow on ties) and `Sitemap:` directives.

use std::collections::HashMap;

#[derive(Debug, Clone)]
struct Rule {
    path: String,
    allow: bool,
}

#[derive(Debug, Clone, Default)]
pub struct Robots {
    /// Lowercased user-agent token to its rule list.
    groups: HashMap<String, Vec<Rule>>,
    sitemaps: Vec<String>,
}

impl Robots {
    pub fn parse(content: &str) -> Self {
        let mut robots = Robots::default();
        // Agents the current rule block applies to. A UA line after rules
        // starts a fresh block.
        let mut agents: Vec<String> = Vec::new();
        let mut in_rules = false;

        for line in content.lines() {
            let line = line.split('#').next().unwrap_or("").trim();
            if line.is_empty() {
                continue;
            }
            let Some((field, value)) = line.split_once(':') else {
                continue;
            };
            let field = field.trim().to_ascii_lowercase();
            let value = value.trim();

            match field.as_str() {
                "user-agent" => {
                    if in_rules {
                        agents.clear();
                        in_rules = false;
                    }
                    agents.push(value.to_ascii_lowercase());
                }
                "allow" | "disallow" => {
                    in_rules = true;
                    if agents.is_empty() {
                        continue;
                    }
                    // empty Disallow means "everything allowed"
                    if value.is_empty() {
                        continue;
                    }
                    for agent in &agents {
                        robots.groups.entry(agent.clone()).or_default().push(Rule {
                            path: value.to_string(),
                            allow: field == "allow",
                        });
                    }
                }
                "sitemap" => robots.sitemaps.push(value.to_string()),
                _ => {}
            }
        }
        robots
    }

    /// Sitemap URLs declared in the file.
    pub fn sitemaps(&self) -> &[String] {
        &self.sitemaps
    }

    /// Whether `path` may be fetched by `user_agent`. The root path is
    /// always allowed.
    pub fn is_allowed(&self, user_agent: &str, path: &str) -> bool {
        if path.is_empty() || path == "/" {
            return true;
        }

        let rules = match self.group_for(user_agent) {
            Some(rules) => rules,
            None => return true,
        };

        let mut verdict = true;
        let mut matched_len = 0usize;
        for rule in rules {
            if path.starts_with(&rule.path) {
                let len = rule.path.len();
                if len > matched_len || (len == matched_len && rule.allow) {
                    matched_len = len;
                    verdict = rule.allow;
                }
            }
        }
        verdict
    }

    fn group_for(&self, user_agent: &str) -> Option<&Vec<Rule>> {
        let ua = user_agent.to_ascii_lowercase();
        self.groups
            .iter()
            .find(|(agent, _)| *agent != "*" && ua.contains(agent.as_str()))
            .map(|(_, rules)| rules)
            .or_else(|| self.groups.get("*"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const ROBOTS: &str = "\
# test file
User-agent: *
Disallow: /secret
Allow: /secret/public
Sitemap: http://abc.onion/sitemap.xml

User-agent: darc
Disallow: /private
";

    #[test]
    fn root_path_is_always_allowed() {
        let robots = Robots::parse("User-agent: *\nDisallow: /\n");
        assert!(robots.is_allowed("darc/0.1.0", "/"));
        assert!(!robots.is_allowed("darc/0.1.0", "/anything"));
    }

    #[test]
    fn wildcard_group_applies_to_unknown_agents() {
        let robots = Robots::parse(ROBOTS);
        assert!(!robots.is_allowed("somebot/1.0", "/secret"));
        assert!(!robots.is_allowed("somebot/1.0", "/secret/inner"));
        assert!(robots.is_allowed("somebot/1.0", "/public"));
    }

    #[test]
    fn longest_match_wins_with_allow_on_tie() {
        let robots = Robots::parse(ROBOTS);
        assert!(robots.is_allowed("somebot/1.0", "/secret/public/page"));
    }

    #[test]
    fn named_group_beats_wildcard() {
        let robots = Robots::parse(ROBOTS);
        assert!(!robots.is_allowed("darc/0.1.0", "/private"));
        // the named group carries no /secret rule
        assert!(robots.is_allowed("darc/0.1.0", "/secret"));
    }

    #[test]
    fn collects_sitemap_directives() {
        let robots = Robots::parse(ROBOTS);
        assert_eq!(robots.sitemaps(), &["http://abc.onion/sitemap.xml".to_string()]);
    }

    #[test]
    fn empty_file_allows_everything() {
        let robots = Robots::parse("");
        assert!(robots.is_allowed("darc/0.1.0", "/anywhere"));
    }
}

// src/recipe/template.rs

//! `%(name)s` style argument templates
//!
//! Built-in variables are filled in by the kitchen per build; recipes may add
//! their own through `[variables]`. The argument `%(option_args)s` is special:
//! standing alone it expands into zero or more arguments.

use std::collections::BTreeMap;

/// Argument that expands into the option-derived argument list
pub const OPTION_ARGS: &str = "%(option_args)s";

/// Built-in variable names, besides `opt.<dependency>`
pub const BUILTINS: &[&str] = &[
    "name",
    "version",
    "variant",
    "prefix",
    "shared_prefix",
    "jobs",
    "option_args",
];

/// Variable values for one build step
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TemplateVars {
    values: BTreeMap<String, String>,
}

impl TemplateVars {
    pub fn new() -> Self {
        Self::default()
    }

    /// Set a variable, returning self for chaining
    pub fn with(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.set(key, value);
        self
    }

    pub fn set(&mut self, key: impl Into<String>, value: impl Into<String>) {
        self.values.insert(key.into(), value.into());
    }

    pub fn get(&self, key: &str) -> Option<&str> {
        self.values.get(key).map(String::as_str)
    }

    /// Replace every known `%(key)s` in a template
    ///
    /// References to unknown variables are left untouched; recipes are
    /// validated for them at load time.
    pub fn substitute(&self, template: &str) -> String {
        let mut out = String::with_capacity(template.len());
        let mut rest = template;

        while let Some(start) = rest.find("%(") {
            out.push_str(&rest[..start]);
            let after = &rest[start + 2..];
            match after.find(")s") {
                Some(end) => {
                    let key = &after[..end];
                    match self.values.get(key) {
                        Some(value) => out.push_str(value),
                        None => out.push_str(&rest[start..start + 2 + end + 2]),
                    }
                    rest = &after[end + 2..];
                }
                None => {
                    out.push_str(&rest[start..]);
                    rest = "";
                }
            }
        }
        out.push_str(rest);
        out
    }

    /// Expand a list of argument templates into an argv
    pub fn expand_args(&self, templates: &[String], option_args: &[String]) -> Vec<String> {
        let mut args = Vec::with_capacity(templates.len() + option_args.len());
        for template in templates {
            if template.trim() == OPTION_ARGS {
                args.extend(option_args.iter().cloned());
            } else {
                args.push(self.substitute(template));
            }
        }
        args
    }
}

/// Variable names referenced by a template
pub fn references(template: &str) -> Vec<&str> {
    let mut refs = Vec::new();
    let mut rest = template;
    while let Some(start) = rest.find("%(") {
        let after = &rest[start + 2..];
        match after.find(")s") {
            Some(end) => {
                refs.push(&after[..end]);
                rest = &after[end + 2..];
            }
            None => break,
        }
    }
    refs
}

#[cfg(test)]
mod tests {
    use super::*;

    fn vars() -> TemplateVars {
        TemplateVars::new()
            .with("name", "wireshark")
            .with("version", "1.10.6")
            .with("prefix", "/cellar/wireshark/1.10.6")
            .with("opt.glib", "/prefix/glib")
    }

    #[test]
    fn test_substitute() {
        let v = vars();
        assert_eq!(v.substitute("--prefix=%(prefix)s"), "--prefix=/cellar/wireshark/1.10.6");
        assert_eq!(v.substitute("%(name)s-%(version)s"), "wireshark-1.10.6");
        assert_eq!(v.substitute("--with-glib=%(opt.glib)s"), "--with-glib=/prefix/glib");
    }

    #[test]
    fn test_unknown_and_unterminated_left_alone() {
        let v = vars();
        assert_eq!(v.substitute("%(nope)s/x"), "%(nope)s/x");
        assert_eq!(v.substitute("100%(done"), "100%(done");
        assert_eq!(v.substitute("plain"), "plain");
    }

    #[test]
    fn test_expand_option_args() {
        let v = vars();
        let templates = vec![
            "--prefix=%(prefix)s".to_string(),
            OPTION_ARGS.to_string(),
            "--disable-static".to_string(),
        ];
        let option_args = vec!["--with-qt".to_string(), "--disable-gtktest".to_string()];
        assert_eq!(
            v.expand_args(&templates, &option_args),
            vec![
                "--prefix=/cellar/wireshark/1.10.6",
                "--with-qt",
                "--disable-gtktest",
                "--disable-static",
            ]
        );
        assert_eq!(v.expand_args(&templates[1..2], &[]), Vec::<String>::new());
    }

    #[test]
    fn test_references() {
        assert_eq!(
            references("%(prefix)s/lib:%(opt.zlib)s"),
            vec!["prefix", "opt.zlib"]
        );
        assert!(references("no templates").is_empty());
    }
}

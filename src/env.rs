use std::collections::BTreeMap;

use serde_json::Value;

use crate::format::Format;
use crate::fragment::{Fragment, Source};
use crate::path::KeyPath;

/// Snapshot of environment variables, sorted by name.
pub type EnvVars = BTreeMap<String, String>;

/// Where environment variables are read from on every update.
#[derive(Debug, Clone, Default, PartialEq)]
pub enum Environment {
    /// The process environment, read fresh on every update.
    #[default]
    Process,
    /// A fixed set of variables (tests, embedding).
    Fixed(EnvVars),
}

impl Environment {
    /// Take a snapshot. Variables whose name or value is not valid UTF-8 are skipped.
    pub fn snapshot(&self) -> EnvVars {
        match self {
            Environment::Process => std::env::vars_os()
                .filter_map(|(k, v)| Some((k.into_string().ok()?, v.into_string().ok()?)))
                .collect(),
            Environment::Fixed(vars) => vars.clone(),
        }
    }
}

/// How environment variables map onto settings.
#[derive(Debug, Clone, PartialEq)]
pub struct EnvOptions {
    pub prefix: String,
    pub delimiter: String,
    /// Name (after the prefix) of the variable listing extra settings files.
    pub settings_file_suffix: String,
    /// Parse values as JSON when possible instead of keeping raw strings.
    pub parse_values: bool,
    /// Variable names to ignore (case-insensitive).
    pub exclude: Vec<String>,
}

impl EnvOptions {
    pub fn new(prefix: &str) -> Self {
        Self {
            prefix: prefix.to_string(),
            delimiter: "__".to_string(),
            settings_file_suffix: "SETTINGS_FILE".to_string(),
            parse_values: false,
            exclude: Vec::new(),
        }
    }

    /// Full name of the settings-file variable, e.g. `MY_APP__SETTINGS_FILE`.
    pub fn settings_file_var(&self) -> String {
        format!(
            "{}{}{}",
            self.prefix.to_uppercase(),
            self.delimiter,
            self.settings_file_suffix.to_uppercase()
        )
    }

    fn strip_prefix<'k>(&self, name: &'k str) -> Option<&'k str> {
        let needle_len = self.prefix.len() + self.delimiter.len();
        let prefix = name.get(..self.prefix.len())?;
        let delimiter = name.get(self.prefix.len()..needle_len)?;
        if prefix.eq_ignore_ascii_case(&self.prefix) && delimiter == self.delimiter {
            name.get(needle_len..)
        } else {
            None
        }
    }
}

/// An entry of the settings-file variable.
#[derive(Debug, Clone, PartialEq)]
pub enum SettingsFileEntry {
    /// A path or glob.
    Path(String),
    /// Structured content given directly as the variable's value.
    Content { format: Format, content: String },
}

/// Everything read from the environment in one pass.
#[derive(Debug, Default)]
pub struct EnvScan {
    pub settings_files: Vec<SettingsFileEntry>,
    pub fragments: Vec<Fragment>,
}

/// Build fragments from environment variables matching `{PREFIX}{DELIM}*`.
///
/// The delimiter separates nesting levels; a single `_` within a segment is
/// literal. Segments are lowercased. Values stay raw strings unless
/// `parse_values` is set, in which case anything that parses as JSON is
/// taken as typed.
///
/// Takes a snapshot so tests can pass synthetic data instead of the process
/// environment.
pub fn scan_env(options: &EnvOptions, vars: &EnvVars) -> EnvScan {
    let mut scan = EnvScan::default();

    for (name, value) in vars {
        if options.exclude.iter().any(|ex| ex.eq_ignore_ascii_case(name)) {
            continue;
        }
        let Some(rest) = options.strip_prefix(name) else {
            continue;
        };
        if rest.eq_ignore_ascii_case(&options.settings_file_suffix) {
            scan.settings_files.extend(settings_file_entries(value));
            continue;
        }

        let path = KeyPath::split(rest, &options.delimiter);
        if path.is_root() {
            continue;
        }
        scan.fragments.push(Fragment::new(
            path,
            env_value(value, options.parse_values),
            Source::env(name.as_str()),
        ));
    }

    scan
}

/// Interpret a raw environment value.
pub fn env_value(raw: &str, parse: bool) -> Value {
    if parse {
        if let Ok(value) = serde_json::from_str(raw) {
            return value;
        }
    }
    Value::String(raw.to_string())
}

/// Expand `$NAME` and `${NAME}` references against `vars`. References to
/// unknown variables and malformed references are left as written.
pub fn expand_vars(template: &str, vars: &EnvVars) -> String {
    let mut out = String::with_capacity(template.len());
    let mut rest = template;
    while let Some(pos) = rest.find('$') {
        out.push_str(&rest[..pos]);
        let after = &rest[pos + 1..];
        let (name, consumed) = match after.strip_prefix('{') {
            Some(braced) => match braced.find('}') {
                Some(end) => (&braced[..end], end + 2),
                None => ("", 0),
            },
            None => {
                let end = after
                    .find(|c: char| !(c.is_ascii_alphanumeric() || c == '_'))
                    .unwrap_or(after.len());
                (&after[..end], end)
            }
        };
        match vars.get(name) {
            Some(value) if !name.is_empty() => out.push_str(value),
            _ => out.push_str(&rest[pos..pos + 1 + consumed]),
        }
        rest = &after[consumed..];
    }
    out.push_str(rest);
    out
}

/// Split the settings-file variable into entries. A value that looks like
/// structured content is taken whole; otherwise it is a comma-separated list.
fn settings_file_entries(value: &str) -> Vec<SettingsFileEntry> {
    let multi_line = value.trim().contains('\n');
    let format = Format::sniff(value).or(if multi_line { Some(Format::Yaml) } else { None });
    if let Some(format) = format {
        return vec![SettingsFileEntry::Content {
            format,
            content: value.to_string(),
        }];
    }
    value
        .split(',')
        .map(str::trim)
        .filter(|entry| !entry.is_empty())
        .map(|entry| SettingsFileEntry::Path(entry.to_string()))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn vars(pairs: &[(&str, &str)]) -> EnvVars {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect()
    }

    fn leaf_pairs(scan: &EnvScan) -> Vec<(String, Value)> {
        scan.fragments
            .iter()
            .map(|f| (f.path.to_string(), f.value.clone()))
            .collect()
    }

    #[test]
    fn simple_key() {
        let scan = scan_env(&EnvOptions::new("MYAPP"), &vars(&[("MYAPP__HOST", "0.0.0.0")]));
        assert_eq!(leaf_pairs(&scan), [("host".to_string(), json!("0.0.0.0"))]);
        assert_eq!(scan.fragments[0].source, Source::env("MYAPP__HOST"));
    }

    #[test]
    fn nested_key() {
        let scan = scan_env(
            &EnvOptions::new("MY_APP"),
            &vars(&[("MY_APP__SECTION1__V1", "test1"), ("MY_APP__SECTION2__V2", "test2")]),
        );
        assert_eq!(
            leaf_pairs(&scan),
            [
                ("section1.v1".to_string(), json!("test1")),
                ("section2.v2".to_string(), json!("test2"))
            ]
        );
    }

    #[test]
    fn values_stay_strings_by_default() {
        let scan = scan_env(&EnvOptions::new("MYAPP"), &vars(&[("MYAPP__PORT", "8080")]));
        assert_eq!(scan.fragments[0].value, json!("8080"));
    }

    #[test]
    fn parse_values_reads_json() {
        let mut options = EnvOptions::new("MYAPP");
        options.parse_values = true;
        let scan = scan_env(
            &options,
            &vars(&[
                ("MYAPP__PORT", "8080"),
                ("MYAPP__DEBUG", "true"),
                ("MYAPP__HOSTS", r#"["a", "b"]"#),
                ("MYAPP__NAME", "hello world"),
            ]),
        );
        assert_eq!(
            leaf_pairs(&scan),
            [
                ("debug".to_string(), json!(true)),
                ("hosts".to_string(), json!(["a", "b"])),
                ("name".to_string(), json!("hello world")),
                ("port".to_string(), json!(8080)),
            ]
        );
    }

    #[test]
    fn prefix_match_is_case_insensitive() {
        let scan = scan_env(&EnvOptions::new("MyApp"), &vars(&[("MYAPP__HOST", "x")]));
        assert_eq!(scan.fragments.len(), 1);
    }

    #[test]
    fn unrelated_and_bare_prefix_ignored() {
        let scan = scan_env(
            &EnvOptions::new("MYAPP"),
            &vars(&[("OTHER__HOST", "x"), ("MYAPP", "x"), ("MYAPP_HOST", "x"), ("MYAPP__", "x")]),
        );
        assert!(scan.fragments.is_empty());
    }

    #[test]
    fn excluded_vars_ignored() {
        let mut options = EnvOptions::new("MYAPP");
        options.exclude.push("myapp__secret".into());
        let scan = scan_env(&options, &vars(&[("MYAPP__SECRET", "x"), ("MYAPP__HOST", "y")]));
        assert_eq!(leaf_pairs(&scan), [("host".to_string(), json!("y"))]);
    }

    #[test]
    fn index_segments() {
        let scan = scan_env(&EnvOptions::new("APP"), &vars(&[("APP__SERVERS__1__HOST", "b")]));
        assert!(scan.fragments[0].path.segments()[1].is_index());
    }

    #[test]
    fn settings_file_var_is_reserved() {
        let scan = scan_env(
            &EnvOptions::new("APP"),
            &vars(&[("APP__SETTINGS_FILE", "a.toml, conf/*.yaml ,")]),
        );
        assert!(scan.fragments.is_empty());
        assert_eq!(
            scan.settings_files,
            [
                SettingsFileEntry::Path("a.toml".into()),
                SettingsFileEntry::Path("conf/*.yaml".into())
            ]
        );
    }

    #[test]
    fn settings_file_var_accepts_inline_content() {
        let scan = scan_env(
            &EnvOptions::new("APP"),
            &vars(&[("APP__SETTINGS_FILE", r#"{"a": 1, "b": 2}"#)]),
        );
        assert_eq!(
            scan.settings_files,
            [SettingsFileEntry::Content {
                format: Format::Json,
                content: r#"{"a": 1, "b": 2}"#.into()
            }]
        );
    }

    #[test]
    fn expand_vars_plain_and_braced() {
        let env = vars(&[("HOST", "db"), ("PORT", "5432")]);
        assert_eq!(expand_vars("${HOST}:$PORT/x", &env), "db:5432/x");
        assert_eq!(expand_vars("$HOST_NAME", &env), "$HOST_NAME");
    }

    #[test]
    fn expand_vars_leaves_unknown_and_malformed() {
        let env = vars(&[("A", "1")]);
        assert_eq!(expand_vars("$MISSING-${A}", &env), "$MISSING-1");
        assert_eq!(expand_vars("cost: $ 5", &env), "cost: $ 5");
        assert_eq!(expand_vars("${A", &env), "${A");
        assert_eq!(expand_vars("${}$", &env), "${}$");
    }

    #[test]
    fn settings_file_var_name() {
        let mut options = EnvOptions::new("my_app");
        options.settings_file_suffix = "sf".into();
        assert_eq!(options.settings_file_var(), "MY_APP__SF");
    }

    #[test]
    fn indirection_suffix_reaches_root() {
        let scan = scan_env(&EnvOptions::new("APP"), &vars(&[("APP___FROM_FILE", "/x.json")]));
        assert_eq!(scan.fragments[0].path.to_string(), "_from_file");
    }

    #[test]
    fn fixed_environment_snapshot() {
        let env = Environment::Fixed(vars(&[("A", "1")]));
        assert_eq!(env.snapshot().get("A").map(String::as_str), Some("1"));
    }
}

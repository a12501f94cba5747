//! Deterministic rewrite pass applied to generated code before execution.
//!
//! The generator is inconsistent about paths and plotting APIs, so every
//! environment convention is enforced here rather than trusted. Rules run in
//! [`RULES`] order and each one sees the output of the previous one.

use std::sync::LazyLock;

use regex::{Captures, Regex};

use crate::core::types::DataFormat;

/// Directories the generator commonly assumes the input data lives under.
pub const DATA_MOUNT_ROOTS: &[&str] = &["/mnt/data", "/app/data"];
/// Relative filename the artifact collector reads the result table from.
pub const RESULT_TABLE_FILE: &str = "result.csv";
/// Relative filename every well-known chart path is redirected to.
pub const CANONICAL_PLOT_FILE: &str = "plot_1.png";
/// Chart filenames the generator tends to write under a mount root.
pub const KNOWN_CHART_FILES: &[&str] = &["heatmap.png", "boxplot.png", "histogram.png"];

const CLOSE_ALL_SUFFIX: &str = "import matplotlib.pyplot as plt\nplt.close('all')\n";

/// A named, pure rewrite from code text to code text.
pub struct Rule {
    pub name: &'static str,
    pub apply: fn(code: &str, data_path: &str) -> String,
}

/// Rewrite rules in application order.
pub const RULES: [Rule; 5] = [
    Rule {
        name: "canonical-data-path",
        apply: canonicalize_data_paths,
    },
    Rule {
        name: "ensure-data-read",
        apply: ensure_data_read,
    },
    Rule {
        name: "canonical-output-paths",
        apply: canonicalize_output_paths,
    },
    Rule {
        name: "seaborn-fallback",
        apply: replace_seaborn,
    },
    Rule {
        name: "close-figures",
        apply: ensure_figures_closed,
    },
];

/// Apply every rule in order. Total: malformed code passes through with best-effort fixes.
pub fn sanitize(code: &str, data_path: &str) -> String {
    RULES
        .iter()
        .fold(code.to_string(), |code, rule| (rule.apply)(&code, data_path))
}

fn mount_alternation() -> String {
    DATA_MOUNT_ROOTS
        .iter()
        .map(|root| regex::escape(root))
        .collect::<Vec<_>>()
        .join("|")
}

static MOUNT_LITERAL_RE: LazyLock<Regex> = LazyLock::new(|| {
    let roots = mount_alternation();
    Regex::new(&format!(r#"'(?:{roots})/[^'\n]+'|"(?:{roots})/[^"\n]+""#))
        .expect("mount literal pattern is valid")
});

static READ_CALL_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)\bread_(?:csv|excel|json|parquet)\s*\(").expect("read call pattern is valid")
});

static IMAGE_AS_DATA_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(
        r#"(?i)\bread_(?:csv|excel|json|parquet)\s*\(\s*[rbfu]?['"][^'"\n]*\.(?:png|jpe?g|gif|svg)['"]"#,
    )
    .expect("image-as-data pattern is valid")
});

static RESULT_PATH_RE: LazyLock<Regex> = LazyLock::new(|| {
    let roots = mount_alternation();
    let file = regex::escape(RESULT_TABLE_FILE);
    Regex::new(&format!(r#"(?:{roots})/(?:[^'"\s/]+/)*{file}"#)).expect("result path pattern is valid")
});

static CHART_PATH_RE: LazyLock<Regex> = LazyLock::new(|| {
    let roots = mount_alternation();
    let charts = KNOWN_CHART_FILES
        .iter()
        .map(|name| regex::escape(name))
        .collect::<Vec<_>>()
        .join("|");
    Regex::new(&format!(r#"(?:{roots})/(?:[^'"\s/]+/)*(?:{charts})"#))
        .expect("chart path pattern is valid")
});

static SEABORN_IMPORT_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?m)^([ \t]*)import[ \t]+seaborn[ \t]+as[ \t]+sns[ \t]*$")
        .expect("seaborn import pattern is valid")
});

static SEABORN_CALL_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"\bsns\.(histplot|boxplot|heatmap)\s*\(").expect("seaborn call pattern is valid")
});

static CLOSE_ALL_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r#"\bplt\.close\(\s*(?:['"]all['"])?\s*\)"#).expect("close pattern is valid")
});

fn is_output_filename(name: &str) -> bool {
    name == RESULT_TABLE_FILE || KNOWN_CHART_FILES.contains(&name)
}

/// Rule 1: every quoted path under a data mount root becomes `data_path`.
///
/// Literals naming a known output file are left for [`canonicalize_output_paths`].
pub fn canonicalize_data_paths(code: &str, data_path: &str) -> String {
    MOUNT_LITERAL_RE
        .replace_all(code, |caps: &Captures<'_>| {
            let literal = &caps[0];
            let quote = &literal[..1];
            let inner = &literal[1..literal.len() - 1];
            let file_name = inner.rsplit('/').next().unwrap_or(inner);
            if is_output_filename(file_name) {
                literal.to_string()
            } else {
                format!("{quote}{data_path}{quote}")
            }
        })
        .into_owned()
}

/// The read statement prepended by [`ensure_data_read`].
pub fn data_read_prelude(data_path: &str) -> String {
    let reader = DataFormat::from_path(data_path).reader();
    format!("import pandas as pd\ndf = {reader}('{data_path}')\n")
}

/// Rule 2: guarantee the input is loaded into `df`.
pub fn ensure_data_read(code: &str, data_path: &str) -> String {
    let prelude = data_read_prelude(data_path);
    if code.starts_with(&prelude) {
        return code.to_string();
    }
    if READ_CALL_RE.is_match(code) && !IMAGE_AS_DATA_RE.is_match(code) {
        return code.to_string();
    }
    format!("{prelude}{code}")
}

/// Rule 3: result table and known charts are written to the working directory,
/// however deep under a mount root the generator placed them.
pub fn canonicalize_output_paths(code: &str, _data_path: &str) -> String {
    let code = RESULT_PATH_RE.replace_all(code, RESULT_TABLE_FILE);
    CHART_PATH_RE
        .replace_all(&code, CANONICAL_PLOT_FILE)
        .into_owned()
}

/// Rule 4: seaborn is optional in the sandbox image, so fall back to matplotlib.
pub fn replace_seaborn(code: &str, _data_path: &str) -> String {
    let code = SEABORN_IMPORT_RE.replace_all(code, "${1}import matplotlib.pyplot as plt");
    SEABORN_CALL_RE
        .replace_all(&code, |caps: &Captures<'_>| {
            let replacement = match &caps[1] {
                "histplot" => "plt.hist(",
                "boxplot" => "plt.boxplot(",
                _ => "plt.imshow(",
            };
            replacement.to_string()
        })
        .into_owned()
}

/// Rule 5: close every figure before the interpreter exits.
pub fn ensure_figures_closed(code: &str, _data_path: &str) -> String {
    if CLOSE_ALL_RE.is_match(code) {
        return code.to_string();
    }
    let mut code = code.to_string();
    if !code.is_empty() && !code.ends_with('\n') {
        code.push('\n');
    }
    code.push_str(CLOSE_ALL_SUFFIX);
    code
}

//! Source normalization before the interpreter sees a submission

/// Full PHP open tag
const OPEN_TAG: &str = "<?php";
/// Short PHP open tag
const SHORT_OPEN_TAG: &str = "<?";

/// Code injected ahead of every submission.
///
/// Defines the standard stream handles (guarded, since some interpreter
/// builds predefine them) and hides warnings, notices and deprecations while
/// keeping fatal errors visible.
pub const PRELUDE: &str = r#"
  defined('STDIN') || define('STDIN', fopen('php://stdin', 'r'));
  defined('STDOUT') || define('STDOUT', fopen('php://stdout', 'w'));
  defined('STDERR') || define('STDERR', fopen('php://stderr', 'w'));

  error_reporting(E_ALL & ~E_WARNING & ~E_NOTICE & ~E_DEPRECATED);

  "#;

/// Strip a leading open tag (only at position 0) and prepend the prelude
pub fn preprocess(raw: &str) -> String {
    let body = raw
        .strip_prefix(OPEN_TAG)
        .or_else(|| raw.strip_prefix(SHORT_OPEN_TAG))
        .unwrap_or(raw);

    let mut source = String::with_capacity(PRELUDE.len() + body.len());
    source.push_str(PRELUDE);
    source.push_str(body);
    source
}

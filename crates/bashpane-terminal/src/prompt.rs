//! The out-of-band prompt marker: the driver's only completion signal.
//!
//! The session replaces the shell prompt with a single-line template whose
//! fields bash expands just before every prompt. Each time a command
//! finishes, one fresh marker lands in the scrollback carrying the exit
//! code and working directory; the driver counts markers and slices the
//! text between them. Marker scanning and decoding are pure functions over
//! a snapshot string so they can be tested against literal transcripts.

use regex::Regex;
use tracing::warn;

use bashpane_types::CmdOutputMetadata;

/// Start sentinel of a marker.
pub const PROMPT_BEGIN: &str = "@@BASHPANE[";
/// End token of a marker. Chosen to never occur in ordinary command
/// output; a snapshot whose tail matches it means the last command closed
/// even if every earlier marker has scrolled out of history.
pub const PROMPT_END: &str = "]@@BASHPANE_END@@";

/// Fixed-key capture: decoding keys off field names, not positions, so a
/// marker survives being embedded in arbitrary surrounding text. A working
/// directory containing a literal field sentinel (`;working_dir=` etc.) is
/// not representable; that is a documented limit of the wire format.
const MARKER_PATTERN: &str = r"@@BASHPANE\[exit_code=(?P<exit_code>-?\d+);working_dir=(?P<working_dir>.*?);truncated=(?P<truncated>[01])\]@@BASHPANE_END@@";

/// One marker occurrence in a snapshot, fields still borrowed from it.
#[derive(Debug, Clone)]
pub struct Marker<'a> {
    pub start: usize,
    pub end: usize,
    exit_code: &'a str,
    working_dir: &'a str,
    truncated: &'a str,
}

pub struct PromptCodec {
    marker_re: Regex,
}

impl Default for PromptCodec {
    fn default() -> Self {
        Self::new()
    }
}

impl PromptCodec {
    pub fn new() -> Self {
        Self {
            marker_re: Regex::new(MARKER_PATTERN).expect("marker pattern compiles"),
        }
    }

    /// The string installed as PS1. `\n` is the PS1 newline escape; `$?`
    /// and `$(pwd)` stay literal here and are expanded by the shell right
    /// before each prompt (the session installs this via PROMPT_COMMAND so
    /// the expansion is re-run every time).
    pub fn template() -> String {
        format!("\\n{PROMPT_BEGIN}exit_code=$?;working_dir=$(pwd);truncated=0{PROMPT_END} ")
    }

    /// All marker occurrences in the snapshot, in order.
    pub fn find_markers<'a>(&self, snapshot: &'a str) -> Vec<Marker<'a>> {
        self.marker_re
            .captures_iter(snapshot)
            .map(|caps| {
                let whole = caps.get(0).expect("capture 0 always present");
                Marker {
                    start: whole.start(),
                    end: whole.end(),
                    exit_code: caps.name("exit_code").map(|m| m.as_str()).unwrap_or(""),
                    working_dir: caps.name("working_dir").map(|m| m.as_str()).unwrap_or(""),
                    truncated: caps.name("truncated").map(|m| m.as_str()).unwrap_or("0"),
                }
            })
            .collect()
    }

    /// Decode one marker. An unparseable exit code degrades to -1
    /// ("unknown") rather than failing the command.
    pub fn decode(&self, marker: &Marker<'_>) -> CmdOutputMetadata {
        let exit_code = match marker.exit_code.parse::<i32>() {
            Ok(code) => code,
            Err(_) => {
                warn!(raw = %marker.exit_code, "marker carried a non-numeric exit code");
                -1
            }
        };
        CmdOutputMetadata {
            exit_code,
            working_dir: marker.working_dir.to_string(),
            truncated: marker.truncated == "1",
            ..Default::default()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    /// What the shell would render the template as, for a given state.
    fn rendered(exit_code: i32, cwd: &str) -> String {
        PromptCodec::template()
            .replace("\\n", "\n")
            .replace("$?", &exit_code.to_string())
            .replace("$(pwd)", cwd)
    }

    #[test]
    fn test_template_ends_with_end_token() {
        assert!(PromptCodec::template().trim_end().ends_with(PROMPT_END));
        assert!(PromptCodec::template().contains(PROMPT_BEGIN));
    }

    #[test]
    fn test_encode_decode_roundtrip() {
        let codec = PromptCodec::new();
        let snapshot = rendered(42, "/tmp/project");
        let markers = codec.find_markers(&snapshot);
        assert_eq!(markers.len(), 1);
        let meta = codec.decode(&markers[0]);
        assert_eq!(meta.exit_code, 42);
        assert_eq!(meta.working_dir, "/tmp/project");
        assert!(!meta.truncated);
    }

    #[test]
    fn test_markers_found_amid_surrounding_text() {
        let codec = PromptCodec::new();
        let snapshot = format!(
            "garbage before{}echo hi\nhi{}trailing",
            rendered(0, "/a"),
            rendered(1, "/a/b"),
        );
        let markers = codec.find_markers(&snapshot);
        assert_eq!(markers.len(), 2);
        assert!(markers[0].start < markers[1].start);
        assert_eq!(codec.decode(&markers[0]).exit_code, 0);
        let last = codec.decode(&markers[1]);
        assert_eq!(last.exit_code, 1);
        assert_eq!(last.working_dir, "/a/b");
    }

    #[test]
    fn test_negative_exit_code_decodes() {
        let codec = PromptCodec::new();
        let snapshot = rendered(-1, "/x");
        let meta = codec.decode(&codec.find_markers(&snapshot)[0]);
        assert_eq!(meta.exit_code, -1);
    }

    #[test]
    fn test_ordinary_output_matches_nothing() {
        let codec = PromptCodec::new();
        let snapshot = "exit_code=0 working_dir=/tmp but no sentinels\n$ ls\nfile";
        assert!(codec.find_markers(snapshot).is_empty());
    }

    #[test]
    fn test_working_dir_with_spaces() {
        let codec = PromptCodec::new();
        let snapshot = rendered(0, "/home/user/my project (copy)");
        let meta = codec.decode(&codec.find_markers(&snapshot)[0]);
        assert_eq!(meta.working_dir, "/home/user/my project (copy)");
    }
}

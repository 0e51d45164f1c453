//! Operator field parsing for `SecRule`.

/// The operator field split into its parts.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OperatorSpec {
    /// `!` prefix.
    pub negated: bool,
    /// Operator name without `@`; `rx` when none was written.
    pub name: String,
    /// Argument text.
    pub argument: String,
}

/// Parse `[!]@name argument`, or a bare regex.
pub fn parse_operator(input: &str) -> OperatorSpec {
    let mut rest = input.trim_start();
    let negated = match rest.strip_prefix('!') {
        Some(r) => {
            rest = r.trim_start();
            true
        }
        None => false,
    };

    match rest.strip_prefix('@') {
        Some(r) => {
            let (name, argument) = match r.find(char::is_whitespace) {
                Some(i) => (&r[..i], r[i..].trim_start()),
                None => (r, ""),
            };
            OperatorSpec {
                negated,
                name: name.to_string(),
                argument: argument.to_string(),
            }
        }
        None => OperatorSpec {
            negated,
            name: "rx".to_string(),
            argument: rest.to_string(),
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_named_operator() {
        let op = parse_operator("@contains /admin");
        assert_eq!(op.name, "contains");
        assert_eq!(op.argument, "/admin");
        assert!(!op.negated);
    }

    #[test]
    fn test_negated_operator() {
        let op = parse_operator("!@ipMatch 10.0.0.0/8,192.168.0.0/16");
        assert!(op.negated);
        assert_eq!(op.name, "ipMatch");
        assert_eq!(op.argument, "10.0.0.0/8,192.168.0.0/16");
    }

    #[test]
    fn test_implicit_rx() {
        let op = parse_operator("^127\\..*");
        assert_eq!(op.name, "rx");
        assert_eq!(op.argument, "^127\\..*");
        let op = parse_operator("!^GET$");
        assert!(op.negated);
        assert_eq!(op.argument, "^GET$");
    }

    #[test]
    fn test_no_argument() {
        let op = parse_operator("@unconditionalMatch");
        assert_eq!(op.name, "unconditionalMatch");
        assert_eq!(op.argument, "");
    }
}

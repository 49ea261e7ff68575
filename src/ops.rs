//! Decipher operations and the pipeline executor

use crate::error::SigdecError;

/// One primitive descrambling step extracted from the player script.
///
/// The set is closed: every driver function seen so far is a sequence of
/// exactly these three array operations, so the pipeline stays matchable
/// and testable without running any script engine.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DecipherOp {
    /// Reverse the whole sequence.
    Reverse,
    /// Drop the first `n` elements.
    Splice(usize),
    /// Exchange element 0 with element `n mod len`.
    Swap(i64),
}

/// Ordered operation list derived from one script version.
///
/// Valid only for the exact `ScriptConfig` it was built from; a changed
/// script yields a freshly built pipeline, never a patched one.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OperationPipeline {
    ops: Vec<DecipherOp>,
}

impl OperationPipeline {
    /// Build a pipeline from an ordered (key, argument) call list.
    ///
    /// Order is preserved exactly; arguments are not range-checked here,
    /// the executor handles out-of-range values.
    pub fn build(
        calls: &[(String, Option<i64>)],
        reverse_key: Option<&str>,
        splice_key: Option<&str>,
        swap_key: Option<&str>,
    ) -> Result<Self, SigdecError> {
        let mut ops = Vec::with_capacity(calls.len());

        for (key, arg) in calls {
            if Some(key.as_str()) == reverse_key {
                ops.push(DecipherOp::Reverse);
            } else if Some(key.as_str()) == splice_key {
                ops.push(DecipherOp::Splice(arg.unwrap_or(0).max(0) as usize));
            } else if Some(key.as_str()) == swap_key {
                ops.push(DecipherOp::Swap(arg.unwrap_or(0)));
            } else {
                // Referenced by the driver but matched by none of the three
                // grammars: the remote format has drifted.
                return Err(SigdecError::AlgorithmNotFound {
                    stage: "operation mapping",
                    wanted: key.clone(),
                });
            }
        }

        Ok(Self { ops })
    }

    /// Apply the pipeline to an input string, left to right.
    pub fn apply(&self, input: &str) -> Result<String, SigdecError> {
        let mut chars: Vec<char> = input.chars().collect();

        for op in &self.ops {
            match *op {
                DecipherOp::Reverse => chars.reverse(),
                DecipherOp::Splice(n) => {
                    chars = if n >= chars.len() {
                        Vec::new()
                    } else {
                        chars.split_off(n)
                    };
                }
                DecipherOp::Swap(n) => {
                    let len = chars.len() as i64;
                    if len == 0 {
                        return Err(SigdecError::EmptyInput);
                    }
                    let idx = ((n % len) + len) % len;
                    chars.swap(0, idx as usize);
                }
            }
        }

        Ok(chars.into_iter().collect())
    }

    pub fn ops(&self) -> &[DecipherOp] {
        &self.ops
    }
}

impl From<Vec<DecipherOp>> for OperationPipeline {
    fn from(ops: Vec<DecipherOp>) -> Self {
        Self { ops }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn pipeline(ops: Vec<DecipherOp>) -> OperationPipeline {
        OperationPipeline::from(ops)
    }

    #[test]
    fn test_reverse_twice_is_identity() {
        let p = pipeline(vec![DecipherOp::Reverse, DecipherOp::Reverse]);
        assert_eq!(p.apply("abc123").unwrap(), "abc123");
    }

    #[test]
    fn test_swap_twice_is_identity() {
        for n in [0i64, 1, 5, 17, -3, 104] {
            for input in ["a", "ab", "abcdef", "0123456789"] {
                let p = pipeline(vec![DecipherOp::Swap(n), DecipherOp::Swap(n)]);
                assert_eq!(p.apply(input).unwrap(), input, "n={} input={}", n, input);
            }
        }
    }

    #[test]
    fn test_swap_negative_argument_is_normalized() {
        // ((-1 mod 3) + 3) mod 3 == 2
        let p = pipeline(vec![DecipherOp::Swap(-1)]);
        assert_eq!(p.apply("abc").unwrap(), "cba");
    }

    #[test]
    fn test_swap_empty_input_fails() {
        let p = pipeline(vec![DecipherOp::Swap(3)]);
        let err = p.apply("").unwrap_err();
        assert!(matches!(err, SigdecError::EmptyInput));
    }

    #[test]
    fn test_splice_drops_prefix() {
        let p = pipeline(vec![DecipherOp::Splice(2)]);
        assert_eq!(p.apply("abc123").unwrap(), "c123");
    }

    #[test]
    fn test_splice_past_end_yields_empty() {
        let p = pipeline(vec![DecipherOp::Splice(10)]);
        assert_eq!(p.apply("abc").unwrap(), "");
    }

    #[test]
    fn test_length_law() {
        // Without Splice, length is preserved; with Splice(n) it is
        // max(0, len - n).
        let input = "abcdefgh";
        let p = pipeline(vec![DecipherOp::Reverse, DecipherOp::Swap(3)]);
        assert_eq!(p.apply(input).unwrap().len(), input.len());

        let p = pipeline(vec![DecipherOp::Splice(3), DecipherOp::Reverse]);
        assert_eq!(p.apply(input).unwrap().len(), input.len() - 3);
    }

    #[test]
    fn test_build_preserves_order() {
        let calls = vec![
            ("aa".to_string(), Some(3)),
            ("bb".to_string(), Some(1)),
            ("cc".to_string(), None),
        ];
        let p = OperationPipeline::build(&calls, Some("cc"), Some("aa"), Some("bb")).unwrap();
        assert_eq!(
            p.ops(),
            &[
                DecipherOp::Splice(3),
                DecipherOp::Swap(1),
                DecipherOp::Reverse
            ]
        );
    }

    #[test]
    fn test_build_unresolved_key_fails() {
        let calls = vec![("zz".to_string(), Some(1))];
        let err = OperationPipeline::build(&calls, Some("cc"), Some("aa"), Some("bb")).unwrap_err();
        match err {
            SigdecError::AlgorithmNotFound { wanted, .. } => assert_eq!(wanted, "zz"),
            other => panic!("unexpected error: {:?}", other),
        }
    }
}

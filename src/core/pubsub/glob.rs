// src/core/pubsub/glob.rs

//! Redis-style glob matching for pattern subscriptions.

/// Returns true if `string` matches the glob `pattern`.
///
/// Supports `*`, `?`, character sets (`[abc]`, `[a-z]`, `[^x]`) and `\` escapes.
pub fn glob_match(pattern: &[u8], string: &[u8]) -> bool {
    let mut p_idx = 0;
    let mut s_idx = 0;
    // Position in the pattern just after the last '*', and the string position to retry from.
    let mut star: Option<(usize, usize)> = None;

    while s_idx < string.len() {
        let step = match pattern.get(p_idx) {
            Some(b'?') => Some(1),
            Some(b'*') => {
                star = Some((p_idx + 1, s_idx));
                p_idx += 1;
                continue;
            }
            Some(b'[') => char_set_len(&pattern[p_idx..], string[s_idx]),
            Some(b'\\') if p_idx + 1 < pattern.len() => {
                (pattern[p_idx + 1] == string[s_idx]).then_some(2)
            }
            Some(&c) if c == string[s_idx] => Some(1),
            _ => None,
        };

        match step {
            Some(len) => {
                p_idx += len;
                s_idx += 1;
            }
            None => match star {
                // Let the last star swallow one more character and retry.
                Some((after_star, from)) => {
                    p_idx = after_star;
                    s_idx = from + 1;
                    star = Some((after_star, from + 1));
                }
                None => return false,
            },
        }
    }

    while pattern.get(p_idx) == Some(&b'*') {
        p_idx += 1;
    }
    p_idx == pattern.len()
}

/// Matches a `[...]` set at the start of `segment` against `c`.
/// Returns the length of the set, brackets included, on a match.
fn char_set_len(segment: &[u8], c: u8) -> Option<usize> {
    if segment.len() < 3 {
        return None;
    }

    let mut idx = 1;
    let negated = segment.get(idx) == Some(&b'^');
    if negated {
        idx += 1;
    }

    let mut matched = false;
    while idx < segment.len() && segment[idx] != b']' {
        let first = segment[idx];
        if idx + 2 < segment.len() && segment[idx + 1] == b'-' && segment[idx + 2] != b']' {
            let last = segment[idx + 2];
            matched |= (first..=last).contains(&c);
            idx += 3;
        } else {
            matched |= first == c;
            idx += 1;
        }
    }

    // An unterminated set never matches.
    (idx < segment.len() && matched != negated).then_some(idx + 1)
}

//! Version comparison for the `semver_*` match types.
//!
//! Versions are looser than strict semver: `2`, `2.1`, and `2.1.3` are all valid, and comparison
//! only looks as deep as the condition's version goes, so `2.1.9` equals target `2.1`.
use std::cmp::Ordering;

const PRE_RELEASE_SEPARATOR: char = '-';
const BUILD_SEPARATOR: char = '+';

#[derive(Debug)]
struct ParsedVersion<'a> {
    parts: Vec<&'a str>,
    pre_release: bool,
}

/// Compare `version` (user attribute) with `target` (condition value).
///
/// Returns `None` if either side is not a valid version.
pub fn compare_versions(version: &str, target: &str) -> Option<Ordering> {
    let target = ParsedVersion::parse(target)?;
    let version = ParsedVersion::parse(version)?;

    for (idx, target_part) in target.parts.iter().enumerate() {
        let Some(part) = version.parts.get(idx) else {
            // A pre-release target sorts above a shorter release version.
            return Some(if target.pre_release {
                Ordering::Greater
            } else {
                Ordering::Less
            });
        };

        if !is_number(part) {
            match (*part).cmp(*target_part) {
                Ordering::Less => {
                    return Some(if target.pre_release && !version.pre_release {
                        Ordering::Greater
                    } else {
                        Ordering::Less
                    });
                }
                Ordering::Greater => {
                    return Some(if !target.pre_release && version.pre_release {
                        Ordering::Less
                    } else {
                        Ordering::Greater
                    });
                }
                Ordering::Equal => {}
            }
        } else if let (Ok(part), Ok(target_part)) =
            (part.parse::<u64>(), target_part.parse::<u64>())
        {
            match part.cmp(&target_part) {
                Ordering::Equal => {}
                ordering => return Some(ordering),
            }
        } else {
            return Some(Ordering::Less);
        }
    }

    if version.pre_release && !target.pre_release {
        return Some(Ordering::Less);
    }

    Some(Ordering::Equal)
}

impl<'a> ParsedVersion<'a> {
    fn parse(s: &'a str) -> Option<Self> {
        if s.contains(char::is_whitespace) {
            return None;
        }

        let pre_release = is_pre_release(s);
        let (prefix, suffix) = if pre_release || is_build(s) {
            let separator = if pre_release {
                PRE_RELEASE_SEPARATOR
            } else {
                BUILD_SEPARATOR
            };
            let (prefix, suffix) = s.split_once(separator)?;
            if prefix.is_empty() || suffix.is_empty() {
                return None;
            }
            (prefix, Some(suffix))
        } else {
            (s, None)
        };

        if prefix.matches('.').count() > 2 {
            return None;
        }

        let mut parts: Vec<&str> = prefix.split('.').collect();
        if !parts.iter().all(|part| is_number(part)) {
            return None;
        }
        parts.extend(suffix);

        Some(ParsedVersion { parts, pre_release })
    }
}

fn is_number(s: &str) -> bool {
    !s.is_empty() && s.bytes().all(|b| b.is_ascii_digit())
}

fn is_pre_release(s: &str) -> bool {
    position(s, PRE_RELEASE_SEPARATOR) < position(s, BUILD_SEPARATOR)
}

fn is_build(s: &str) -> bool {
    position(s, BUILD_SEPARATOR) < position(s, PRE_RELEASE_SEPARATOR)
}

fn position(s: &str, separator: char) -> usize {
    s.find(separator).unwrap_or(usize::MAX)
}

//! Instance naming and zone helpers.
//!
//! Compute Engine names must match `^[a-z]([-a-z0-9]*[a-z0-9])?$` and be at
//! most 63 characters long.

use rand::Rng;

/// Longest name Compute Engine accepts.
pub const MAX_INSTANCE_NAME_LEN: usize = 63;

const SUFFIX_LEN: usize = 5;

/// Builds a unique, provider-valid instance name from the request.
///
/// The raw name is `<runner>-<pool>-<timestamp>-<suffix>`, where spaces are
/// removed from the runner name and the suffix is five random lowercase
/// letters. The result is lowercased, characters outside `[a-z0-9-]` become
/// `-`, and only the trailing 63 characters are kept so the timestamp and
/// suffix survive truncation.
#[must_use]
pub fn instance_name(runner_name: &str, pool_name: &str, timestamp: i64) -> String {
    instance_name_with_suffix(runner_name, pool_name, timestamp, &random_suffix())
}

pub(crate) fn instance_name_with_suffix(
    runner_name: &str,
    pool_name: &str,
    timestamp: i64,
    suffix: &str,
) -> String {
    let runner: String = runner_name.chars().filter(|c| *c != ' ').collect();
    sanitise(&format!("{runner}-{pool_name}-{timestamp}-{suffix}"))
}

fn random_suffix() -> String {
    let mut rng = rand::thread_rng();
    (0..SUFFIX_LEN)
        .map(|_| char::from(rng.gen_range(b'a'..=b'z')))
        .collect()
}

fn sanitise(raw: &str) -> String {
    let cleaned: Vec<char> = raw
        .chars()
        .map(|c| {
            let lower = c.to_ascii_lowercase();
            if lower.is_ascii_lowercase() || lower.is_ascii_digit() || lower == '-' {
                lower
            } else {
                '-'
            }
        })
        .collect();
    let start = cleaned.len().saturating_sub(MAX_INSTANCE_NAME_LEN);
    cleaned
        .get(start..)
        .unwrap_or_default()
        .iter()
        .collect::<String>()
        .trim_start_matches(|c: char| !c.is_ascii_lowercase())
        .trim_end_matches('-')
        .to_owned()
}

/// Region containing `zone`: everything before the final `-`.
#[must_use]
pub fn region_of(zone: &str) -> String {
    zone.rsplit_once('-')
        .map_or_else(|| zone.to_owned(), |(region, _)| region.to_owned())
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    fn is_valid_name(name: &str) -> bool {
        let mut chars = name.chars();
        let starts_with_letter = chars.next().is_some_and(|c| c.is_ascii_lowercase());
        starts_with_letter
            && name.len() <= MAX_INSTANCE_NAME_LEN
            && name
                .chars()
                .all(|c| c.is_ascii_lowercase() || c.is_ascii_digit() || c == '-')
            && !name.ends_with('-')
    }

    #[test]
    fn composes_runner_pool_timestamp_and_suffix() {
        let name = instance_name_with_suffix("My Runner", "linux-pool", 1_700_000_000, "abcde");
        assert_eq!(name, "myrunner-linux-pool-1700000000-abcde");
    }

    #[rstest]
    #[case("runner", "pool")]
    #[case("Runner With Spaces", "POOL_under_score")]
    #[case("123-numeric-start", "p")]
    #[case("ünïcødé", "päöl")]
    #[case("--", "--")]
    #[case(
        "a-runner-name-that-is-much-longer-than-the-provider-allows-for-any-instance",
        "and-a-pool-name-that-is-also-rather-long"
    )]
    fn generated_names_are_provider_valid(#[case] runner: &str, #[case] pool: &str) {
        for _ in 0..20 {
            let name = instance_name(runner, pool, 1_700_000_000);
            assert!(is_valid_name(&name), "invalid name generated: {name}");
        }
    }

    #[test]
    fn truncation_keeps_the_suffix() {
        let runner = "r".repeat(80);
        let name = instance_name_with_suffix(&runner, "pool", 1_700_000_000, "qwxyz");
        assert_eq!(name.len(), MAX_INSTANCE_NAME_LEN);
        assert!(name.ends_with("-pool-1700000000-qwxyz"));
    }

    #[test]
    fn leading_non_letters_are_trimmed() {
        let name = instance_name_with_suffix("9lives", "pool", 1, "abcde");
        assert_eq!(name, "lives-pool-1-abcde");
    }

    #[test]
    fn suffix_is_five_lowercase_letters() {
        let suffix = random_suffix();
        assert_eq!(suffix.len(), SUFFIX_LEN);
        assert!(suffix.chars().all(|c| c.is_ascii_lowercase()));
    }

    #[rstest]
    #[case("us-central1-a", "us-central1")]
    #[case("europe-west4-b", "europe-west4")]
    #[case("nodash", "nodash")]
    fn region_strips_zone_letter(#[case] zone: &str, #[case] expected: &str) {
        assert_eq!(region_of(zone), expected);
    }
}

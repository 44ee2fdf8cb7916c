/// Line-based output comparison: lenient to trailing whitespace, strict on
/// line count and ordering.
pub fn outputs_match(expected: &str, actual: &str) -> bool {
    let expected = split_and_trim(expected);
    let actual = split_and_trim(actual);
    expected.len() == actual.len() && expected.iter().zip(&actual).all(|(a, b)| a == b)
}

fn split_and_trim(text: &str) -> Vec<&str> {
    text.trim_end().lines().map(|line| line.trim_end()).collect()
}

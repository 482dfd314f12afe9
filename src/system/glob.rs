/// Matches `text` against a glob `pattern` with `*` (any run) and `?`
/// (any single byte) wildcards. Matching is case-sensitive.
pub fn glob_match(
    pattern: &str,
    text: &str,
) -> bool {
    let p = pattern.as_bytes();
    let t = text.as_bytes();
    let (mut pi, mut ti) = (0, 0);
    // Position after the last `*` and the text index it is matched up to
    let mut star: Option<(usize, usize)> = None;

    while ti < t.len() {
        if pi < p.len() && (p[pi] == b'?' || p[pi] == t[ti]) {
            pi += 1;
            ti += 1;
        } else if pi < p.len() && p[pi] == b'*' {
            star = Some((pi + 1, ti));
            pi += 1;
        } else if let Some((after_star, matched)) = star {
            pi = after_star;
            ti = matched + 1;
            star = Some((after_star, matched + 1));
        } else {
            return false;
        }
    }
    p[pi..].iter().all(|&c| c == b'*')
}

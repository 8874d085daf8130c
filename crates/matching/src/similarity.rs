/// Ratcliff/Obershelp similarity: `2 * M / T`, where `M` counts characters in
/// recursively found longest common blocks and `T` is the combined length.
///
/// Returns a value in `[0.0, 1.0]`; two empty strings score `1.0`.
pub fn similarity_ratio(s1: &str, s2: &str) -> f64 {
    let a: Vec<char> = s1.chars().collect();
    let b: Vec<char> = s2.chars().collect();

    let total = a.len() + b.len();
    if total == 0 {
        return 1.0;
    }

    2.0 * matching_chars(&a, &b) as f64 / total as f64
}

fn matching_chars(a: &[char], b: &[char]) -> usize {
    let mut matched = 0;
    let mut pending = vec![(0, a.len(), 0, b.len())];

    while let Some((alo, ahi, blo, bhi)) = pending.pop() {
        let (i, j, k) = longest_block(a, b, alo, ahi, blo, bhi);
        if k == 0 {
            continue;
        }
        matched += k;
        if alo < i && blo < j {
            pending.push((alo, i, blo, j));
        }
        if i + k < ahi && j + k < bhi {
            pending.push((i + k, ahi, j + k, bhi));
        }
    }

    matched
}

/// Longest common block within `a[alo..ahi]` and `b[blo..bhi]` as `(i, j, len)`.
/// Ties go to the block starting earliest in `a`, then earliest in `b`.
fn longest_block(
    a: &[char],
    b: &[char],
    alo: usize,
    ahi: usize,
    blo: usize,
    bhi: usize,
) -> (usize, usize, usize) {
    let (mut best_i, mut best_j, mut best_k) = (alo, blo, 0);
    let width = bhi - blo + 1;

    // prev[x] = length of the common suffix ending at a[i-1], b[blo + x - 1].
    let mut prev = vec![0usize; width];
    let mut curr = vec![0usize; width];

    for i in alo..ahi {
        for j in blo..bhi {
            let x = j - blo + 1;
            curr[x] = if a[i] == b[j] { prev[x - 1] + 1 } else { 0 };
            if curr[x] > best_k {
                best_k = curr[x];
                best_i = i + 1 - best_k;
                best_j = j + 1 - best_k;
            }
        }
        std::mem::swap(&mut prev, &mut curr);
    }

    (best_i, best_j, best_k)
}

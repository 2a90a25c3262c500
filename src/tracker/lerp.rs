/// 窓内の1サンプル。valid でないものは欠損扱いで補間対象
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Sample {
    pub value: f32,
    pub valid: bool,
}

impl Sample {
    pub fn new(value: f32, valid: bool) -> Self {
        Self { value, valid }
    }

    pub fn missing() -> Self {
        Self {
            value: 0.0,
            valid: false,
        }
    }
}

fn lerp(a: f32, b: f32, t: f32) -> f32 {
    (1.0 - t) * a + t * b
}

/// 欠損を埋めた系列を返す。
///
/// 内側の欠損は前後の有効値で線形補間、端の欠損は最も近い有効値を保持する。
/// 有効値が1つもなければ None。
pub fn fill_gaps<'a>(samples: impl IntoIterator<Item = &'a Sample>) -> Option<Vec<f32>> {
    let samples: Vec<&Sample> = samples.into_iter().collect();
    let valid: Vec<usize> = samples
        .iter()
        .enumerate()
        .filter(|(_, s)| s.valid)
        .map(|(i, _)| i)
        .collect();
    let first = *valid.first()?;
    let last = *valid.last()?;

    let mut out = Vec::with_capacity(samples.len());
    let mut next = 0;
    for i in 0..samples.len() {
        if samples[i].valid {
            out.push(samples[i].value);
            next += 1;
            continue;
        }
        if i < first {
            out.push(samples[first].value);
        } else if i > last {
            out.push(samples[last].value);
        } else {
            // valid[next-1] < i < valid[next]
            let lo = valid[next - 1];
            let hi = valid[next];
            let t = (i - lo) as f32 / (hi - lo) as f32;
            out.push(lerp(samples[lo].value, samples[hi].value, t));
        }
    }
    Some(out)
}

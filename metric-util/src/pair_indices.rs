use candle_core::Result;

/// All valid anchor-positive `(a1, p)` and anchor-negative `(a2, n)`
/// pairs of a label vector, listed anchor-major.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct PairIndices {
    pub a1: Vec<usize>,
    pub p: Vec<usize>,
    pub a2: Vec<usize>,
    pub n: Vec<usize>,
}

impl PairIndices {
    pub fn num_positive(&self) -> usize {
        self.a1.len()
    }

    pub fn num_negative(&self) -> usize {
        self.a2.len()
    }
}

/// A pair or triplet selection handed over by a miner
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum IndicesTuple {
    Pairs {
        a1: Vec<usize>,
        p: Vec<usize>,
        a2: Vec<usize>,
        n: Vec<usize>,
    },
    Triplets {
        a: Vec<usize>,
        p: Vec<usize>,
        n: Vec<usize>,
    },
}

impl IndicesTuple {
    pub fn parts(&self) -> Vec<&[usize]> {
        match self {
            IndicesTuple::Pairs { a1, p, a2, n } => {
                vec![a1.as_slice(), p.as_slice(), a2.as_slice(), n.as_slice()]
            }
            IndicesTuple::Triplets { a, p, n } => vec![a.as_slice(), p.as_slice(), n.as_slice()],
        }
    }

    pub fn is_empty(&self) -> bool {
        self.parts().iter().all(|x| x.is_empty())
    }
}

impl From<PairIndices> for IndicesTuple {
    fn from(pairs: PairIndices) -> Self {
        IndicesTuple::Pairs {
            a1: pairs.a1,
            p: pairs.p,
            a2: pairs.a2,
            n: pairs.n,
        }
    }
}

/// Enumerate every positive and negative pair of `labels`.
///
/// * positive: `labels[i] == labels[j]` and `i != j`
/// * negative: `labels[i] != labels[j]`
///
pub fn get_all_pairs_indices<L>(labels: &[L]) -> PairIndices
where
    L: PartialEq,
{
    let mut ret = PairIndices::default();
    for (i, l_i) in labels.iter().enumerate() {
        for (j, l_j) in labels.iter().enumerate() {
            if l_i == l_j {
                if i != j {
                    ret.a1.push(i);
                    ret.p.push(j);
                }
            } else {
                ret.a2.push(i);
                ret.n.push(j);
            }
        }
    }
    ret
}

/// Per-sample weights derived from a miner's selection.
///
/// Without a selection (or with an empty one) every sample weighs 1.
/// Otherwise each sample weighs `count / max_count`, where `count` is
/// how many times it appears anywhere in the tuple.
///
/// * `indices_tuple` - optional miner output
/// * `n` - batch size
///
pub fn convert_to_weights(indices_tuple: Option<&IndicesTuple>, n: usize) -> Result<Vec<f32>> {
    let tuple = match indices_tuple {
        Some(tuple) if !tuple.is_empty() => tuple,
        _ => return Ok(vec![1_f32; n]),
    };

    let mut counts = vec![0_usize; n];
    for &i in tuple.parts().into_iter().flatten() {
        if i >= n {
            candle_core::bail!("miner index {} out of range for batch size {}", i, n);
        }
        counts[i] += 1;
    }

    let max_count = counts.iter().copied().max().unwrap_or(0).max(1) as f32;
    Ok(counts.into_iter().map(|c| c as f32 / max_count).collect())
}

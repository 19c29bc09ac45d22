pub mod common_io;
pub mod pair_indices;
pub mod tensor_io;
pub mod tensor_util;
pub mod traits;

pub use pair_indices::{convert_to_weights, get_all_pairs_indices, IndicesTuple, PairIndices};
pub use tensor_util::{dense_indicator, dist_mat, l2_normalize};

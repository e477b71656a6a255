mod bundle;
mod checkpoint;
mod map_record;
mod match_record;
mod player_stats;
mod refdata;

pub use bundle::*;
pub use checkpoint::*;
pub use map_record::*;
pub use match_record::*;
pub use player_stats::*;
pub use refdata::*;

use std::{
    error::Error,
    fmt::{Display, Formatter, Result as FmtResult},
};

/// The guild id given to [`shard_id`] was not a valid decimal integer.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct InvalidId {
    guild_id: String,
}

impl Display for InvalidId {
    fn fmt(&self, f: &mut Formatter<'_>) -> FmtResult {
        write!(f, "guild id '{}' is not a valid decimal integer", self.guild_id)
    }
}

impl Error for InvalidId {}

/// Compute which shard a guild belongs to, per Discord's sharding formula:
/// `(guild_id >> 22) % total_shards`.
///
/// # Errors
///
/// Returns [`InvalidId`] if `guild_id` is not a valid decimal `u64`.
///
/// # Panics
///
/// Panics if `total_shards` is `0`; a shard count of zero is a programmer
/// error, not a runtime condition to recover from.
pub fn shard_id(guild_id: &str, total_shards: u32) -> Result<u32, InvalidId> {
    assert!(total_shards > 0, "total_shards must be at least 1");

    let id: u64 = guild_id.parse().map_err(|_| InvalidId { guild_id: guild_id.to_owned() })?;

    Ok(((id >> 22) % u64::from(total_shards)) as u32)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn known_guild_ids_map_to_documented_shards() {
        assert_eq!(shard_id("175928847299117063", 4).unwrap(), 1);
        assert_eq!(shard_id("41771983423143937", 8).unwrap(), 0);
    }

    #[test]
    fn result_is_always_in_range() {
        for total in 1..=16u32 {
            for guild in ["1", "4194304", "175928847299117063", "999999999999999999"] {
                let id = shard_id(guild, total).unwrap();
                assert!(id < total);
            }
        }
    }

    #[test]
    fn non_numeric_input_fails() {
        assert!(shard_id("not-a-guild-id", 4).is_err());
    }
}

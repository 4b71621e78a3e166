//! Type-safe identifiers.
//!
//! Every identifier is a newtype around [`uuid::Uuid`] (v4) so that a round
//! id can never be passed where a bet id is expected. All of them share the
//! same surface, generated by [`uuid_id!`].

use std::fmt;

use serde::{Deserialize, Serialize};
use utoipa::ToSchema;

macro_rules! uuid_id {
    ($(#[$meta:meta])* $name:ident) => {
        $(#[$meta])*
        #[derive(
            Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize, ToSchema,
        )]
        #[serde(transparent)]
        pub struct $name(uuid::Uuid);

        impl $name {
            /// Creates a new random identifier (UUID v4).
            #[must_use]
            pub fn new() -> Self {
                Self(uuid::Uuid::new_v4())
            }

            /// Wraps an existing [`uuid::Uuid`].
            #[must_use]
            pub const fn from_uuid(uuid: uuid::Uuid) -> Self {
                Self(uuid)
            }

            /// Returns the inner [`uuid::Uuid`].
            #[must_use]
            pub const fn as_uuid(&self) -> &uuid::Uuid {
                &self.0
            }
        }

        impl Default for $name {
            fn default() -> Self {
                Self::new()
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, "{}", self.0)
            }
        }

        impl From<uuid::Uuid> for $name {
            fn from(uuid: uuid::Uuid) -> Self {
                Self(uuid)
            }
        }

        impl From<$name> for uuid::Uuid {
            fn from(id: $name) -> Self {
                id.0
            }
        }

        impl std::str::FromStr for $name {
            type Err = uuid::Error;

            fn from_str(s: &str) -> Result<Self, Self::Err> {
                s.parse::<uuid::Uuid>().map(Self)
            }
        }
    };
}

uuid_id!(
    /// Identifier of one play cycle ([`super::Round`]).
    RoundId
);
uuid_id!(
    /// Identifier of a single wager ([`super::Bet`]).
    BetId
);
uuid_id!(
    /// Player identity, resolved upstream by the authentication collaborator.
    UserId
);
uuid_id!(
    /// Operator identity used to attribute admin actions in the ledger.
    AdminId
);
uuid_id!(
    /// Identifier of an immutable ledger entry.
    EntryId
);
uuid_id!(
    /// Identifier of a failed-bet record.
    FailedBetId
);
uuid_id!(
    /// Identifier of one live streaming connection.
    ConnectionId
);

//! Typed UUID wrapper. `Id<T, V>` carries a phantom entity marker so a
//! `TaskId` can never be handed to a function expecting a `DueWorkId`, and a
//! phantom version marker selecting `Uuid::now_v7()` vs `Uuid::new_v4()`
//! generation.

use std::fmt;
use std::marker::PhantomData;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Generate via UUIDv7 (time-ordered). The default version for entities
/// created by this system, since `ORDER BY id` then approximates creation
/// order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct V7;

/// Generate via UUIDv4 (random). Used where no ordering property is
/// desired or the id originates outside this system.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct V4;

#[repr(transparent)]
pub struct Id<T, V = V7>(Uuid, PhantomData<fn() -> (T, V)>);

impl<T> Id<T, V7> {
    pub fn new() -> Self {
        Id(Uuid::now_v7(), PhantomData)
    }
}

impl<T> Id<T, V4> {
    pub fn new_random() -> Self {
        Id(Uuid::new_v4(), PhantomData)
    }
}

impl<T> Id<T, V7> {
    pub fn default() -> Self {
        Self::new()
    }
}

impl<T, V> Id<T, V> {
    pub fn from_uuid(uuid: Uuid) -> Self {
        Id(uuid, PhantomData)
    }

    pub fn into_uuid(self) -> Uuid {
        self.0
    }

    pub fn as_uuid(&self) -> &Uuid {
        &self.0
    }

    pub fn nil() -> Self {
        Id(Uuid::nil(), PhantomData)
    }

    pub fn is_nil(&self) -> bool {
        self.0.is_nil()
    }

    pub fn parse(s: &str) -> Result<Self, uuid::Error> {
        Ok(Id(Uuid::parse_str(s)?, PhantomData))
    }
}

impl<T, V> Clone for Id<T, V> {
    fn clone(&self) -> Self {
        *self
    }
}
impl<T, V> Copy for Id<T, V> {}

impl<T, V> fmt::Debug for Id<T, V> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Id<{}>({})", std::any::type_name::<T>(), self.0)
    }
}

impl<T, V> fmt::Display for Id<T, V> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl<T, V> PartialEq for Id<T, V> {
    fn eq(&self, other: &Self) -> bool {
        self.0 == other.0
    }
}
impl<T, V> Eq for Id<T, V> {}

impl<T, V> PartialOrd for Id<T, V> {
    fn partial_cmp(&self, other: &Self) -> Option<std::cmp::Ordering> {
        Some(self.cmp(other))
    }
}
impl<T, V> Ord for Id<T, V> {
    fn cmp(&self, other: &Self) -> std::cmp::Ordering {
        self.0.cmp(&other.0)
    }
}

impl<T, V> std::hash::Hash for Id<T, V> {
    fn hash<H: std::hash::Hasher>(&self, state: &mut H) {
        self.0.hash(state);
    }
}

impl<T, V> AsRef<Uuid> for Id<T, V> {
    fn as_ref(&self) -> &Uuid {
        &self.0
    }
}

impl<T, V> From<Uuid> for Id<T, V> {
    fn from(uuid: Uuid) -> Self {
        Id(uuid, PhantomData)
    }
}

impl<T, V> From<Id<T, V>> for Uuid {
    fn from(id: Id<T, V>) -> Self {
        id.0
    }
}

impl<T, V> FromStr for Id<T, V> {
    type Err = uuid::Error;
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

impl<T, V> Serialize for Id<T, V> {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: serde::Serializer,
    {
        self.0.serialize(serializer)
    }
}

impl<'de, T, V> Deserialize<'de> for Id<T, V> {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: serde::Deserializer<'de>,
    {
        Uuid::deserialize(deserializer).map(Id::from_uuid)
    }
}

impl<T, V> sqlx::Type<sqlx::Postgres> for Id<T, V> {
    fn type_info() -> sqlx::postgres::PgTypeInfo {
        <Uuid as sqlx::Type<sqlx::Postgres>>::type_info()
    }
}

impl<T, V> sqlx::postgres::PgHasArrayType for Id<T, V> {
    fn array_type_info() -> sqlx::postgres::PgTypeInfo {
        <Uuid as sqlx::postgres::PgHasArrayType>::array_type_info()
    }
}

impl<'q, T, V> sqlx::Encode<'q, sqlx::Postgres> for Id<T, V> {
    fn encode_by_ref(
        &self,
        buf: &mut sqlx::postgres::PgArgumentBuffer,
    ) -> Result<sqlx::encode::IsNull, Box<dyn std::error::Error + Send + Sync>> {
        <Uuid as sqlx::Encode<'q, sqlx::Postgres>>::encode_by_ref(&self.0, buf)
    }
}

impl<'r, T, V> sqlx::Decode<'r, sqlx::Postgres> for Id<T, V> {
    fn decode(
        value: sqlx::postgres::PgValueRef<'r>,
    ) -> Result<Self, Box<dyn std::error::Error + Send + Sync>> {
        <Uuid as sqlx::Decode<'r, sqlx::Postgres>>::decode(value).map(Id::from_uuid)
    }
}

/// Entity marker types and their id aliases (spec §3 Data Model).
pub struct Agent;
pub type AgentId = Id<Agent>;

pub struct Task;
pub type TaskId = Id<Task>;

pub struct TaskRun;
pub type TaskRunId = Id<TaskRun>;

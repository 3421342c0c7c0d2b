mod db;
mod redis;

pub use self::db::DbQueue;
pub use self::redis::RedisQueue;

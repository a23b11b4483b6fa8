//! Command table mapping parsed requests to engine operations, grounded on
//! `main.cpp`'s `do_request`/`do_*` family and the match-per-query shape of
//! the teacher's `ServerTask::process`/`handle`.

use crate::engine::Database;
use crate::errors::DispatchError;
use crate::wire::Value;

fn parse_i64(bytes: &[u8]) -> Option<i64> {
    std::str::from_utf8(bytes).ok()?.parse().ok()
}

fn parse_f64(bytes: &[u8]) -> Option<f64> {
    std::str::from_utf8(bytes).ok()?.parse().ok()
}

/// Runs one already-parsed request against `db`. `now_micros` is the
/// monotonic clock reading the I/O driver sampled for this loop iteration.
pub(crate) fn execute(db: &mut Database, args: &[Vec<u8>], now_micros: u64) -> Value {
    let Some(cmd) = args.first() else {
        tracing::debug!("rejected request with no command");
        return Value::Err(DispatchError::Unknown);
    };
    let cmd = cmd.to_ascii_lowercase();

    match cmd.as_slice() {
        b"keys" if args.len() == 1 => Value::Arr(
            db.keys()
                .into_iter()
                .map(|(k, v)| Value::Kv(k, v))
                .collect(),
        ),

        b"get" if args.len() == 2 => match db.get(&args[1]) {
            Ok(Some(value)) => Value::Kv(args[1].clone(), value.to_vec()),
            Ok(None) => Value::Nil,
            Err(e) => Value::Err(e),
        },

        b"set" if args.len() == 3 => match db.set(&args[1], &args[2]) {
            Ok(()) => Value::Nil,
            Err(e) => Value::Err(e),
        },

        b"del" if args.len() == 2 => Value::Int(db.del(&args[1]) as i64),

        b"pexpire" if args.len() == 3 => match parse_i64(&args[2]) {
            Some(ttl_ms) => Value::Int(db.pexpire(&args[1], ttl_ms, now_micros) as i64),
            None => Value::Err(DispatchError::Arg),
        },

        b"pttl" if args.len() == 2 => Value::Int(db.pttl(&args[1], now_micros)),

        b"zadd" if args.len() == 4 => match parse_f64(&args[2]) {
            Some(score) => match db.zadd(&args[1], score, &args[3]) {
                Ok(created) => Value::Int(created as i64),
                Err(e) => Value::Err(e),
            },
            None => Value::Err(DispatchError::Arg),
        },

        b"zrem" if args.len() == 3 => match db.zrem(&args[1], &args[2]) {
            Ok(Some(removed)) => Value::Int(removed as i64),
            Ok(None) => Value::Nil,
            Err(e) => Value::Err(e),
        },

        b"zscore" if args.len() == 3 => match db.zscore(&args[1], &args[2]) {
            Ok(Some(score)) => Value::Dbl(score),
            Ok(None) => Value::Nil,
            Err(e) => Value::Err(e),
        },

        b"zquery" if args.len() == 6 => {
            match (parse_f64(&args[2]), parse_i64(&args[4]), parse_i64(&args[5])) {
                (Some(score), Some(offset), Some(limit)) => {
                    match db.zquery(&args[1], score, &args[3], offset, limit) {
                        Ok(pairs) => Value::Arr(
                            pairs
                                .into_iter()
                                .flat_map(|(name, score)| [Value::Str(name), Value::Dbl(score)])
                                .collect(),
                        ),
                        Err(e) => Value::Err(e),
                    }
                }
                _ => Value::Err(DispatchError::Arg),
            }
        }

        _ => {
            tracing::debug!(
                command = %String::from_utf8_lossy(&cmd),
                arity = args.len(),
                "unknown command or bad arity"
            );
            Value::Err(DispatchError::Unknown)
        }
    }
}

use std::sync::LazyLock;

/// Increments `KEYS[1]` and, when the increment created the key, sets its
/// expiry to `ARGV[1]` seconds.
///
/// Returns `{count, armed, err}`: `armed` is 1 when this call set the TTL,
/// `err` carries the EXPIRE error text when arming failed. EXPIRE runs
/// through `pcall` so a failure there cannot abort the script after the
/// increment has already been applied.
pub(crate) static INCREMENT_AND_ARM_SCRIPT: LazyLock<redis::Script> = LazyLock::new(|| {
    redis::Script::new(
        r#"local key = KEYS[1]
local window = tonumber(ARGV[1])

local count = redis.call("INCR", key)
if count ~= 1 then
  return {count, 0, ""}
end

local reply = redis.pcall("EXPIRE", key, window)
if type(reply) == "table" and reply.err then
  return {count, 0, reply.err}
end
if reply ~= 1 then
  return {count, 0, "EXPIRE did not apply"}
end

return {count, 1, ""}
"#,
    )
});

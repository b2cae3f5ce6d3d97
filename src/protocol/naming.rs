//! Reply-queue naming.

/// Build the name of the queue a correlated reply is delivered on.
///
/// The format is `{queue}_{route}{id}` and is part of the wire contract:
/// peers written against other implementations derive the same name.
///
/// Two in-flight calls on the same `queue` and `route` with an empty `id`
/// collide on this name. Callers issuing overlapping requests must pass a
/// unique `id` per call.
pub fn reply_queue_name(queue: &str, route: &str, id: &str) -> String {
    format!("{}_{}{}", queue, route, id)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_id_is_empty() {
        assert_eq!(reply_queue_name("orders", "create", ""), "orders_create");
    }

    #[test]
    fn test_id_appended_without_separator() {
        assert_eq!(reply_queue_name("orders", "create", "42"), "orders_create42");
    }
}

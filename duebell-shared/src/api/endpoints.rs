use percent_encoding::{NON_ALPHANUMERIC, utf8_percent_encode};

use super::API_V1_PREFIX;

fn base_join(base: &str, path: &str) -> String {
    let b = base.trim_end_matches('/');
    let p = path.trim_start_matches('/');
    format!("{}/{}", b, p)
}

fn enc(s: &str) -> String {
    utf8_percent_encode(s, NON_ALPHANUMERIC).to_string()
}

pub fn client_register(base: &str) -> String {
    base_join(base, &format!("{}/clients/register", API_V1_PREFIX))
}

pub fn client_pending(base: &str, client_id: &str) -> String {
    base_join(
        base,
        &format!(
            "{}/clients/{}/reminders/pending",
            API_V1_PREFIX,
            enc(client_id)
        ),
    )
}

pub fn reminder_ack(base: &str, client_id: &str, reminder_id: &str) -> String {
    base_join(
        base,
        &format!(
            "{}/clients/{}/reminders/{}/ack",
            API_V1_PREFIX,
            enc(client_id),
            enc(reminder_id)
        ),
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn joins_without_duplicate_slashes() {
        assert_eq!(
            client_register("http://h:8080/"),
            "http://h:8080/api/v1/clients/register"
        );
    }

    #[test]
    fn path_segments_are_percent_encoded() {
        let url = reminder_ack("http://h", "user@box/1", "n 1");
        assert_eq!(
            url,
            "http://h/api/v1/clients/user%40box%2F1/reminders/n%201/ack"
        );
    }
}

use anyhow::Result;
use rusqlite::Connection;
use tracing::info;

pub fn run(conn: &Connection) -> Result<()> {
    conn.execute_batch("CREATE TABLE IF NOT EXISTS schema_version (version INTEGER NOT NULL);")?;

    let version: i64 = conn.query_row(
        "SELECT COALESCE(MAX(version), 0) FROM schema_version",
        [],
        |r| r.get(0),
    )?;

    if version < 1 {
        info!("Running migration v1 (initial schema)");
        conn.execute_batch(
            "
            CREATE TABLE users (
                id          TEXT PRIMARY KEY,
                username    TEXT NOT NULL UNIQUE,
                password    TEXT NOT NULL,
                created_at  TEXT NOT NULL
            );

            CREATE TABLE bookings (
                id                      TEXT PRIMARY KEY,
                guest_id                TEXT NOT NULL,
                host_id                 TEXT NOT NULL,
                race_id                 TEXT NOT NULL,
                property_id             TEXT NOT NULL,
                status                  TEXT NOT NULL,
                check_in_date           TEXT NOT NULL,
                check_out_date          TEXT NOT NULL,
                guests_count            INTEGER NOT NULL,
                points_cost             INTEGER NOT NULL,
                request_message         TEXT,
                host_response_message   TEXT,
                host_response_deadline  TEXT NOT NULL,
                accepted_at             TEXT,
                rejected_at             TEXT,
                confirmed_at            TEXT,
                completed_at            TEXT,
                cancelled_at            TEXT,
                cancelled_by            TEXT,
                created_at              TEXT NOT NULL,
                updated_at              TEXT NOT NULL
            );

            CREATE INDEX idx_bookings_guest ON bookings(guest_id, created_at);
            CREATE INDEX idx_bookings_host ON bookings(host_id, created_at);
            CREATE INDEX idx_bookings_deadline ON bookings(status, host_response_deadline);

            -- One row per applied transition; request_id makes retries replayable.
            CREATE TABLE booking_transitions (
                id          TEXT PRIMARY KEY,
                booking_id  TEXT NOT NULL REFERENCES bookings(id),
                from_status TEXT NOT NULL,
                to_status   TEXT NOT NULL,
                actor_id    TEXT,
                request_id  TEXT,
                created_at  TEXT NOT NULL,
                UNIQUE(booking_id, request_id)
            );

            CREATE INDEX idx_transitions_booking ON booking_transitions(booking_id, created_at);

            -- Append-only. Balance is SUM(amount), never stored.
            CREATE TABLE points_transactions (
                id          TEXT PRIMARY KEY,
                user_id     TEXT NOT NULL,
                booking_id  TEXT REFERENCES bookings(id),
                amount      INTEGER NOT NULL,
                type        TEXT NOT NULL,
                description TEXT NOT NULL,
                created_at  TEXT NOT NULL
            );

            CREATE INDEX idx_points_user ON points_transactions(user_id, created_at);
            CREATE INDEX idx_points_booking ON points_transactions(booking_id, type);

            CREATE TRIGGER points_transactions_no_update
                BEFORE UPDATE ON points_transactions
                BEGIN SELECT RAISE(ABORT, 'points_transactions is append-only'); END;

            CREATE TRIGGER points_transactions_no_delete
                BEFORE DELETE ON points_transactions
                BEGIN SELECT RAISE(ABORT, 'points_transactions is append-only'); END;

            CREATE TABLE conversations (
                id                   TEXT PRIMARY KEY,
                booking_id           TEXT NOT NULL UNIQUE REFERENCES bookings(id),
                participant_1_id     TEXT NOT NULL,
                participant_2_id     TEXT NOT NULL,
                last_message_at      TEXT,
                participant_1_unread INTEGER NOT NULL DEFAULT 0,
                participant_2_unread INTEGER NOT NULL DEFAULT 0
            );

            CREATE TABLE messages (
                id              TEXT PRIMARY KEY,
                booking_id      TEXT NOT NULL REFERENCES bookings(id),
                sender_id       TEXT NOT NULL,
                message         TEXT NOT NULL,
                message_type    TEXT NOT NULL,
                client_ref      TEXT,
                read            INTEGER NOT NULL DEFAULT 0,
                created_at      TEXT NOT NULL,
                UNIQUE(sender_id, client_ref)
            );

            CREATE INDEX idx_messages_booking ON messages(booking_id, created_at);

            CREATE TABLE notifications (
                id          TEXT PRIMARY KEY,
                user_id     TEXT NOT NULL,
                type        TEXT NOT NULL,
                title       TEXT NOT NULL,
                message     TEXT NOT NULL,
                read        INTEGER NOT NULL DEFAULT 0,
                data        TEXT NOT NULL DEFAULT '{}',
                created_at  TEXT NOT NULL,
                updated_at  TEXT NOT NULL
            );

            CREATE INDEX idx_notifications_user ON notifications(user_id, read, created_at);

            INSERT INTO schema_version (version) VALUES (1);
            ",
        )?;
    }

    info!("Database migrations complete");
    Ok(())
}

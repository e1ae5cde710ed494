// End-to-end tests for the Audiobook Backend API
//
// Each test gets its own server on an ephemeral port, backed by the in-memory
// job store, a temp-dir blob store and a stub TTS engine. Source documents are
// PDFs generated per test, so the whole pipeline runs for real.
//
// The Postgres job store tests share one testcontainers PostgreSQL instance
// and create an isolated database per test.

mod helpers;
mod test_audiobooks;
mod test_health;
mod test_pg_job_repository;

//! User role repository.
//!
//! Credentials live with the identity provider; this table only records the
//! screening role of each known email.

use crate::model::user::{Role, User};
use crate::repo::{ensure_connection_ready, map_unique_violation, RepoError, RepoResult};
use rusqlite::{params, Connection, OptionalExtension, Row};

/// Repository interface for user role rows.
pub trait UserRepository {
    fn create_user(&self, user: &User) -> RepoResult<()>;
    /// Inserts `user` only while no user exists, as one atomic statement.
    /// Returns whether the row was written.
    fn create_first_user(&self, user: &User) -> RepoResult<bool>;
    /// Removes a role row. Returns whether a row was removed.
    fn delete_user(&self, email: &str) -> RepoResult<bool>;
    fn get_user(&self, email: &str) -> RepoResult<Option<User>>;
    fn update_role(&self, email: &str, role: Role) -> RepoResult<()>;
    /// Lists users sorted by email.
    fn list_users(&self) -> RepoResult<Vec<User>>;
}

/// SQLite-backed user repository.
pub struct SqliteUserRepository<'conn> {
    conn: &'conn Connection,
}

impl<'conn> SqliteUserRepository<'conn> {
    pub fn try_new(conn: &'conn Connection) -> RepoResult<Self> {
        ensure_connection_ready(conn)?;
        Ok(Self { conn })
    }
}

impl UserRepository for SqliteUserRepository<'_> {
    fn create_user(&self, user: &User) -> RepoResult<()> {
        self.conn
            .execute(
                "INSERT INTO users (email, role, created_at) VALUES (?1, ?2, ?3);",
                params![user.email.as_str(), user.role.as_str(), user.created_at],
            )
            .map_err(|err| map_unique_violation(err, format!("user `{}`", user.email)))?;
        Ok(())
    }

    fn create_first_user(&self, user: &User) -> RepoResult<bool> {
        let changed = self
            .conn
            .execute(
                "INSERT INTO users (email, role, created_at)
                 SELECT ?1, ?2, ?3
                 WHERE NOT EXISTS (SELECT 1 FROM users);",
                params![user.email.as_str(), user.role.as_str(), user.created_at],
            )
            .map_err(|err| map_unique_violation(err, format!("user `{}`", user.email)))?;
        Ok(changed > 0)
    }

    fn delete_user(&self, email: &str) -> RepoResult<bool> {
        let changed = self
            .conn
            .execute("DELETE FROM users WHERE email = ?1;", [email])?;
        Ok(changed > 0)
    }

    fn get_user(&self, email: &str) -> RepoResult<Option<User>> {
        self.conn
            .query_row(
                "SELECT email, role, created_at FROM users WHERE email = ?1;",
                [email],
                |row| Ok(parse_user_row(row)),
            )
            .optional()?
            .transpose()
    }

    fn update_role(&self, email: &str, role: Role) -> RepoResult<()> {
        let changed = self.conn.execute(
            "UPDATE users SET role = ?2 WHERE email = ?1;",
            params![email, role.as_str()],
        )?;
        if changed == 0 {
            return Err(RepoError::UserNotFound(email.to_string()));
        }
        Ok(())
    }

    fn list_users(&self) -> RepoResult<Vec<User>> {
        let mut stmt = self
            .conn
            .prepare("SELECT email, role, created_at FROM users ORDER BY email ASC;")?;
        let mut rows = stmt.query([])?;
        let mut users = Vec::new();
        while let Some(row) = rows.next()? {
            users.push(parse_user_row(row)?);
        }
        Ok(users)
    }
}

fn parse_user_row(row: &Row<'_>) -> RepoResult<User> {
    let role_text: String = row.get("role")?;
    let role = Role::parse(&role_text)
        .ok_or_else(|| RepoError::InvalidData(format!("invalid role `{role_text}` in users.role")))?;
    Ok(User {
        email: row.get("email")?,
        role,
        created_at: row.get("created_at")?,
    })
}

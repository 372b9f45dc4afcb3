#[cfg(test)]
#[path = "users_test.rs"]
mod tests;

use dashmap::DashMap;

use crate::domain::models::UserType;

/// Known identities and their plan.
#[derive(Default)]
pub struct UserDirectory {
    users: DashMap<String, UserType>,
}

impl UserDirectory {
    /// Builds the directory from comma separated identity lists. An identity
    /// listed as premium wins over a registered entry.
    pub fn from_lists(premium: &str, registered: &str) -> UserDirectory {
        let directory = UserDirectory::default();
        for id in split_list(registered) {
            directory.register(&id, UserType::Free);
        }
        for id in split_list(premium) {
            directory.register(&id, UserType::Premium);
        }

        return directory;
    }

    pub fn register(&self, identity: &str, user_type: UserType) {
        self.users.insert(identity.to_string(), user_type);
    }

    pub fn exists(&self, identity: &str) -> bool {
        return self.users.contains_key(identity);
    }

    /// Anonymous callers are guests. Identified callers are free unless the
    /// directory says otherwise.
    pub fn user_type(&self, identity: Option<&str>) -> UserType {
        let Some(identity) = identity else {
            return UserType::Guest;
        };

        return self
            .users
            .get(identity)
            .map(|entry| return *entry.value())
            .unwrap_or(UserType::Free);
    }

    pub fn count(&self) -> usize {
        return self.users.len();
    }
}

fn split_list(list: &str) -> Vec<String> {
    return list
        .split(',')
        .map(|e| return e.trim().to_string())
        .filter(|e| return !e.is_empty())
        .collect();
}

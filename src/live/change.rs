//! Deltas for a live, ordered result list.

use crate::types::Model;
use serde::{Deserialize, Serialize};
use std::cmp::Ordering;

/// Either a full snapshot or one incremental change.
///
/// `old` alone removes a record, `new` inserts or repositions one.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ListChange<T> {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub whole_list: Option<Vec<T>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub old: Option<T>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub new: Option<T>,
}

impl<T> ListChange<T> {
    pub fn whole(list: Vec<T>) -> Self {
        Self { whole_list: Some(list), old: None, new: None }
    }

    pub fn added(item: T) -> Self {
        Self { whole_list: None, old: None, new: Some(item) }
    }

    pub fn removed(item: T) -> Self {
        Self { whole_list: None, old: Some(item), new: None }
    }

    pub fn is_snapshot(&self) -> bool {
        self.whole_list.is_some()
    }
}

impl<T: Model> ListChange<T> {
    /// Apply this change to a locally held list kept in `compare` order.
    ///
    /// Records are matched by identifier.
    pub fn apply_to(&self, list: &mut Vec<T>, compare: impl Fn(&T, &T) -> Ordering) {
        if let Some(whole) = &self.whole_list {
            list.clone_from(whole);
            list.sort_by(&compare);
            return;
        }
        if let Some(old) = &self.old {
            list.retain(|item| item.id() != old.id());
        }
        if let Some(new) = &self.new {
            list.retain(|item| item.id() != new.id());
            let position = list.partition_point(|item| compare(item, new) == Ordering::Less);
            list.insert(position, new.clone());
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::expr::{Query, SortPart};
    use crate::testing::User;

    #[test]
    fn test_wire_shape() {
        let change = ListChange::whole(vec![1, 2]);
        assert_eq!(serde_json::to_string(&change).unwrap(), r#"{"wholeList":[1,2]}"#);

        let parsed: ListChange<i32> = serde_json::from_str(r#"{"old":3}"#).unwrap();
        assert_eq!(parsed, ListChange::removed(3));
    }

    #[test]
    fn test_decodes_records_without_default() {
        let parsed: ListChange<User> =
            serde_json::from_str(r#"{"new":{"_id":"1","name":"Ann","age":30}}"#).unwrap();
        assert_eq!(parsed, ListChange::added(User::new("1", "Ann", 30)));

        let parsed: ListChange<User> = serde_json::from_str(r#"{"wholeList":[]}"#).unwrap();
        assert_eq!(parsed, ListChange::whole(vec![]));
    }

    #[test]
    fn test_apply_keeps_order() {
        let query = Query::default().order_by(SortPart::ascending("age"));
        let compare = query.comparator::<User>();
        let mut list = Vec::new();

        ListChange::whole(vec![User::new("1", "Ann", 30), User::new("2", "Bob", 20)]).apply_to(&mut list, &compare);
        assert_eq!(list[0].id, "2");

        ListChange::added(User::new("3", "Cid", 25)).apply_to(&mut list, &compare);
        ListChange::added(User::new("2", "Bob", 40)).apply_to(&mut list, &compare);
        let ids: Vec<&str> = list.iter().map(|u| u.id.as_str()).collect();
        assert_eq!(ids, vec!["3", "1", "2"]);

        ListChange::removed(User::new("1", "Ann", 30)).apply_to(&mut list, &compare);
        assert_eq!(list.len(), 2);
    }
}

//! Group chats and their membership.
//!
//! The owner is inserted as an admin member on creation and can neither be
//! removed nor leave; the group goes away only through `delete_group`.

use rusqlite::{params, OptionalExtension};
use swarg_shared::{GroupId, MessageId, UserId};

use crate::database::Database;
use crate::error::{Result, StoreError};
use crate::models::Group;
use crate::sql;

const GROUP_COLUMNS: &str = "id, name, avatar, owner_id, last_message_id, created_at, updated_at";

fn normalize_name(name: &str) -> Result<String> {
    let name = name.trim();
    if name.is_empty() {
        return Err(StoreError::Invalid("group name must not be empty".into()));
    }
    Ok(name.to_string())
}

impl Database {
    // ------------------------------------------------------------------
    // Create / read
    // ------------------------------------------------------------------

    pub fn create_group(&self, owner: UserId, name: &str, avatar: Option<&str>) -> Result<Group> {
        self.create_group_with_members(owner, name, avatar, &[])
    }

    /// Create the group with its initial members in one transaction. Every
    /// listed user must exist; otherwise nothing is stored.
    pub fn create_group_with_members(
        &self,
        owner: UserId,
        name: &str,
        avatar: Option<&str>,
        members: &[UserId],
    ) -> Result<Group> {
        let name = normalize_name(name)?;
        if !self.user_exists(owner)? {
            return Err(StoreError::NotFound("User"));
        }
        for member in members {
            if !self.user_exists(*member)? {
                return Err(StoreError::NotFound("User"));
            }
        }

        let id = GroupId::new();
        let now = sql::now();
        let tx = self.conn().unchecked_transaction()?;
        tx.execute(
            "INSERT INTO chat_groups (id, name, avatar, owner_id, created_at, updated_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?5)",
            params![id.to_string(), name, avatar, owner.to_string(), now],
        )?;
        tx.execute(
            "INSERT INTO group_members (group_id, user_id, is_admin, joined_at)
             VALUES (?1, ?2, 1, ?3)",
            params![id.to_string(), owner.to_string(), now],
        )?;
        for member in members.iter().filter(|m| **m != owner) {
            tx.execute(
                "INSERT OR IGNORE INTO group_members (group_id, user_id, is_admin, joined_at)
                 VALUES (?1, ?2, 0, ?3)",
                params![id.to_string(), member.to_string(), now],
            )?;
        }
        tx.commit()?;

        tracing::debug!(group = %id, owner = %owner, members = members.len(), "created group");
        self.get_group(id)
    }

    pub fn get_group(&self, id: GroupId) -> Result<Group> {
        let mut group = self
            .conn()
            .query_row(
                &format!("SELECT {GROUP_COLUMNS} FROM chat_groups WHERE id = ?1"),
                params![id.to_string()],
                row_to_group,
            )
            .map_err(StoreError::not_found("Group"))?;
        self.load_members(&mut group)?;
        Ok(group)
    }

    pub fn group_exists(&self, id: GroupId) -> Result<bool> {
        let found: Option<i64> = self
            .conn()
            .query_row(
                "SELECT 1 FROM chat_groups WHERE id = ?1",
                params![id.to_string()],
                |row| row.get(0),
            )
            .optional()?;
        Ok(found.is_some())
    }

    pub fn is_group_member(&self, id: GroupId, user: UserId) -> Result<bool> {
        Ok(self.member_role(id, user)?.is_some())
    }

    /// Owner counts as admin.
    pub fn is_group_admin(&self, id: GroupId, user: UserId) -> Result<bool> {
        Ok(self.member_role(id, user)?.unwrap_or(false))
    }

    /// `None` if not a member, otherwise whether the member is an admin.
    fn member_role(&self, id: GroupId, user: UserId) -> Result<Option<bool>> {
        Ok(self
            .conn()
            .query_row(
                "SELECT is_admin FROM group_members WHERE group_id = ?1 AND user_id = ?2",
                params![id.to_string(), user.to_string()],
                |row| row.get(0),
            )
            .optional()?)
    }

    pub fn group_member_ids(&self, id: GroupId) -> Result<Vec<UserId>> {
        let mut stmt = self.conn().prepare(
            "SELECT user_id FROM group_members WHERE group_id = ?1
             ORDER BY joined_at ASC, user_id ASC",
        )?;
        let rows = stmt.query_map(params![id.to_string()], |row| sql::uuid_at(row, 0).map(UserId))?;
        sql::collect(rows)
    }

    /// Ids of every group `user` belongs to. Used to join rooms on connect.
    pub fn group_ids_for(&self, user: UserId) -> Result<Vec<GroupId>> {
        let mut stmt = self
            .conn()
            .prepare("SELECT group_id FROM group_members WHERE user_id = ?1")?;
        let rows = stmt.query_map(params![user.to_string()], |row| {
            sql::uuid_at(row, 0).map(GroupId)
        })?;
        sql::collect(rows)
    }

    /// Groups of `user`, most recent activity first.
    pub fn list_groups_for(&self, user: UserId) -> Result<Vec<Group>> {
        let mut groups = {
            let mut stmt = self.conn().prepare(
                "SELECT g.id, g.name, g.avatar, g.owner_id, g.last_message_id,
                        g.created_at, g.updated_at
                 FROM chat_groups g
                 JOIN group_members m ON m.group_id = g.id
                 WHERE m.user_id = ?1
                 ORDER BY g.updated_at DESC",
            )?;
            let rows = stmt.query_map(params![user.to_string()], row_to_group)?;
            sql::collect(rows)?
        };
        for group in &mut groups {
            self.load_members(group)?;
        }
        Ok(groups)
    }

    fn load_members(&self, group: &mut Group) -> Result<()> {
        let mut stmt = self.conn().prepare(
            "SELECT user_id, is_admin FROM group_members
             WHERE group_id = ?1 ORDER BY joined_at ASC, user_id ASC",
        )?;
        let rows = stmt.query_map(params![group.id.to_string()], |row| {
            Ok((UserId(sql::uuid_at(row, 0)?), row.get::<_, bool>(1)?))
        })?;
        for (user, is_admin) in sql::collect(rows)? {
            if is_admin {
                group.admins.push(user);
            }
            group.members.push(user);
        }
        Ok(())
    }

    // ------------------------------------------------------------------
    // Update
    // ------------------------------------------------------------------

    /// Rename or re-avatar a group. Admins only.
    pub fn update_group(
        &self,
        id: GroupId,
        actor: UserId,
        name: Option<&str>,
        avatar: Option<Option<&str>>,
    ) -> Result<Group> {
        self.require_admin(id, actor)?;
        if let Some(name) = name {
            self.conn().execute(
                "UPDATE chat_groups SET name = ?1 WHERE id = ?2",
                params![normalize_name(name)?, id.to_string()],
            )?;
        }
        if let Some(avatar) = avatar {
            self.conn().execute(
                "UPDATE chat_groups SET avatar = ?1 WHERE id = ?2",
                params![avatar, id.to_string()],
            )?;
        }
        self.get_group(id)
    }

    /// Add `user` on behalf of `actor` (an admin). Returns `false` if the
    /// user was already a member.
    pub fn add_group_member(&self, id: GroupId, actor: UserId, user: UserId) -> Result<bool> {
        self.require_admin(id, actor)?;
        if !self.user_exists(user)? {
            return Err(StoreError::NotFound("User"));
        }
        self.insert_member(id, user)
    }

    /// Unconditional insert, used by invite redemption.
    pub(crate) fn insert_member(&self, id: GroupId, user: UserId) -> Result<bool> {
        let inserted = self.conn().execute(
            "INSERT OR IGNORE INTO group_members (group_id, user_id, is_admin, joined_at)
             VALUES (?1, ?2, 0, ?3)",
            params![id.to_string(), user.to_string(), sql::now()],
        )?;
        Ok(inserted > 0)
    }

    /// Remove `user` on behalf of `actor`. Admins can remove plain members;
    /// only the owner can remove another admin; the owner is never removed.
    pub fn remove_group_member(&self, id: GroupId, actor: UserId, user: UserId) -> Result<()> {
        let group = self.get_group(id)?;
        if !group.is_admin(actor) {
            return Err(StoreError::Forbidden("only group admins can remove members".into()));
        }
        if user == group.owner {
            return Err(StoreError::Forbidden("the group owner cannot be removed".into()));
        }
        if !group.is_member(user) {
            return Err(StoreError::NotFound("Member"));
        }
        if group.admins.contains(&user) && actor != group.owner {
            return Err(StoreError::Forbidden("only the owner can remove an admin".into()));
        }

        self.delete_member(id, user)
    }

    pub fn leave_group(&self, id: GroupId, user: UserId) -> Result<()> {
        let group = self.get_group(id)?;
        if user == group.owner {
            return Err(StoreError::Forbidden(
                "the owner cannot leave; delete the group instead".into(),
            ));
        }
        if !group.is_member(user) {
            return Err(StoreError::NotFound("Member"));
        }
        self.delete_member(id, user)
    }

    fn delete_member(&self, id: GroupId, user: UserId) -> Result<()> {
        self.conn().execute(
            "DELETE FROM group_members WHERE group_id = ?1 AND user_id = ?2",
            params![id.to_string(), user.to_string()],
        )?;
        Ok(())
    }

    /// Promote or demote a member. Owner only; the owner's own role is fixed.
    pub fn set_group_admin(
        &self,
        id: GroupId,
        actor: UserId,
        user: UserId,
        admin: bool,
    ) -> Result<Group> {
        let group = self.get_group(id)?;
        if actor != group.owner {
            return Err(StoreError::Forbidden("only the owner can change admins".into()));
        }
        if user == group.owner {
            return Err(StoreError::Forbidden("the owner is always an admin".into()));
        }
        if !group.is_member(user) {
            return Err(StoreError::NotFound("Member"));
        }

        self.conn().execute(
            "UPDATE group_members SET is_admin = ?1 WHERE group_id = ?2 AND user_id = ?3",
            params![admin, id.to_string(), user.to_string()],
        )?;
        self.get_group(id)
    }

    /// Owner only. Messages, memberships and invites cascade. Returns the
    /// group as it was so callers can notify its members.
    pub fn delete_group(&self, id: GroupId, actor: UserId) -> Result<Group> {
        let group = self.get_group(id)?;
        if actor != group.owner {
            return Err(StoreError::Forbidden("only the owner can delete a group".into()));
        }
        self.conn()
            .execute("DELETE FROM chat_groups WHERE id = ?1", params![id.to_string()])?;
        Ok(group)
    }

    fn require_admin(&self, id: GroupId, actor: UserId) -> Result<()> {
        if !self.group_exists(id)? {
            return Err(StoreError::NotFound("Group"));
        }
        if !self.is_group_admin(id, actor)? {
            return Err(StoreError::Forbidden("group admin rights required".into()));
        }
        Ok(())
    }

    /// Move the last-message pointer and bump `updated_at`.
    pub(crate) fn set_group_last_message(
        &self,
        id: GroupId,
        message: Option<MessageId>,
        at: &str,
    ) -> Result<()> {
        self.conn().execute(
            "UPDATE chat_groups SET last_message_id = ?1, updated_at = ?2 WHERE id = ?3",
            params![message.map(|m| m.to_string()), at, id.to_string()],
        )?;
        Ok(())
    }
}

/// Members and admins are filled in by `load_members`.
fn row_to_group(row: &rusqlite::Row<'_>) -> rusqlite::Result<Group> {
    Ok(Group {
        id: GroupId(sql::uuid_at(row, 0)?),
        name: row.get(1)?,
        avatar: row.get(2)?,
        owner: UserId(sql::uuid_at(row, 3)?),
        admins: Vec::new(),
        members: Vec::new(),
        last_message_id: sql::opt_uuid_at(row, 4)?.map(MessageId),
        created_at: sql::ts_at(row, 5)?,
        updated_at: sql::ts_at(row, 6)?,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::database::tests::{add_user, test_db};

    #[test]
    fn owner_is_admin_member() {
        let (_dir, db) = test_db();
        let owner = add_user(&db, "Owner");

        let group = db.create_group(owner, "  Crew  ", None).unwrap();
        assert_eq!(group.name, "Crew");
        assert_eq!(group.members, vec![owner]);
        assert_eq!(group.admins, vec![owner]);
        assert!(db.is_group_admin(group.id, owner).unwrap());
        assert_eq!(db.group_ids_for(owner).unwrap(), vec![group.id]);

        assert!(matches!(
            db.create_group(owner, " ", None),
            Err(StoreError::Invalid(_))
        ));
    }

    #[test]
    fn initial_members_are_all_or_nothing() {
        let (_dir, db) = test_db();
        let owner = add_user(&db, "Owner");
        let m = add_user(&db, "M");

        assert!(matches!(
            db.create_group_with_members(owner, "Crew", None, &[m, UserId::new()]),
            Err(StoreError::NotFound("User"))
        ));
        assert!(db.list_groups_for(owner).unwrap().is_empty());
        assert!(db.list_groups_for(m).unwrap().is_empty());

        let group = db
            .create_group_with_members(owner, "Crew", None, &[m, m, owner])
            .unwrap();
        assert_eq!(group.members.len(), 2);
        assert_eq!(group.admins, vec![owner]);
        assert!(db.is_group_member(group.id, m).unwrap());
        assert!(!db.is_group_admin(group.id, m).unwrap());
    }

    #[test]
    fn only_admins_add_members() {
        let (_dir, db) = test_db();
        let owner = add_user(&db, "Owner");
        let m = add_user(&db, "M");
        let n = add_user(&db, "N");
        let group = db.create_group(owner, "Crew", None).unwrap();

        assert!(db.add_group_member(group.id, owner, m).unwrap());
        assert!(!db.add_group_member(group.id, owner, m).unwrap());
        assert!(matches!(
            db.add_group_member(group.id, m, n),
            Err(StoreError::Forbidden(_))
        ));
        assert!(matches!(
            db.add_group_member(group.id, owner, UserId::new()),
            Err(StoreError::NotFound("User"))
        ));
        assert_eq!(db.group_member_ids(group.id).unwrap().len(), 2);
    }

    #[test]
    fn removal_rules() {
        let (_dir, db) = test_db();
        let owner = add_user(&db, "Owner");
        let admin = add_user(&db, "Admin");
        let other_admin = add_user(&db, "Admin2");
        let member = add_user(&db, "Member");
        let group = db.create_group(owner, "Crew", None).unwrap();
        for u in [admin, other_admin, member] {
            db.add_group_member(group.id, owner, u).unwrap();
        }
        db.set_group_admin(group.id, owner, admin, true).unwrap();
        db.set_group_admin(group.id, owner, other_admin, true).unwrap();

        assert!(matches!(
            db.remove_group_member(group.id, member, admin),
            Err(StoreError::Forbidden(_))
        ));
        assert!(matches!(
            db.remove_group_member(group.id, admin, owner),
            Err(StoreError::Forbidden(_))
        ));
        assert!(matches!(
            db.remove_group_member(group.id, admin, other_admin),
            Err(StoreError::Forbidden(_))
        ));

        db.remove_group_member(group.id, admin, member).unwrap();
        assert!(!db.is_group_member(group.id, member).unwrap());
        assert!(matches!(
            db.remove_group_member(group.id, admin, member),
            Err(StoreError::NotFound("Member"))
        ));

        db.remove_group_member(group.id, owner, other_admin).unwrap();
        assert_eq!(db.get_group(group.id).unwrap().admins.len(), 2);
    }

    #[test]
    fn owner_cannot_leave_but_members_can() {
        let (_dir, db) = test_db();
        let owner = add_user(&db, "Owner");
        let member = add_user(&db, "Member");
        let group = db.create_group(owner, "Crew", None).unwrap();
        db.add_group_member(group.id, owner, member).unwrap();

        assert!(matches!(
            db.leave_group(group.id, owner),
            Err(StoreError::Forbidden(_))
        ));
        db.leave_group(group.id, member).unwrap();
        assert!(db.list_groups_for(member).unwrap().is_empty());
    }

    #[test]
    fn delete_cascades_messages() {
        let (_dir, db) = test_db();
        let owner = add_user(&db, "Owner");
        let member = add_user(&db, "Member");
        let group = db.create_group(owner, "Crew", None).unwrap();
        db.add_group_member(group.id, owner, member).unwrap();
        let msg = db.append_message(group.id.into(), member, Some("hey"), &[]).unwrap();

        assert!(matches!(
            db.delete_group(group.id, member),
            Err(StoreError::Forbidden(_))
        ));
        let deleted = db.delete_group(group.id, owner).unwrap();
        assert_eq!(deleted.members.len(), 2);
        assert!(db.find_message(msg.id).unwrap().is_none());
        assert!(matches!(
            db.get_group(group.id),
            Err(StoreError::NotFound("Group"))
        ));
    }

    #[test]
    fn update_requires_admin() {
        let (_dir, db) = test_db();
        let owner = add_user(&db, "Owner");
        let member = add_user(&db, "Member");
        let group = db.create_group(owner, "Crew", None).unwrap();
        db.add_group_member(group.id, owner, member).unwrap();

        assert!(matches!(
            db.update_group(group.id, member, Some("Mine"), None),
            Err(StoreError::Forbidden(_))
        ));
        let updated = db
            .update_group(group.id, owner, Some("Crew 2"), Some(Some("https://cdn.example/g.png")))
            .unwrap();
        assert_eq!(updated.name, "Crew 2");
        assert!(updated.avatar.is_some());

        let cleared = db.update_group(group.id, owner, None, Some(None)).unwrap();
        assert_eq!(cleared.name, "Crew 2");
        assert!(cleared.avatar.is_none());
        assert!(matches!(
            db.update_group(group.id, owner, Some("  "), None),
            Err(StoreError::Invalid(_))
        ));
        assert!(matches!(
            db.update_group(GroupId::new(), owner, Some("X"), None),
            Err(StoreError::NotFound("Group"))
        ));
        assert_eq!(db.get_group(group.id).unwrap().name, "Crew 2");
    }
}

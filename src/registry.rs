use crate::error::{AuthFailure, LedgerError};
use crate::id::ParticipantId;
use crate::roles::{Participant, Role};
use crate::transaction::{ChangeSet, StateChange};
use std::collections::HashMap;

/// Identity & role registry.
///
/// Maps identities to a role and display name and keeps the append-only list
/// of every identity explicitly added. The registry never changes itself in
/// response to a request: mutating calls return a [`ChangeSet`] that the
/// caller commits and then feeds back through [`IdentityRegistry::apply`].
#[derive(Debug, Clone)]
pub struct IdentityRegistry {
    /// The deploying identity; acts as admin while no explicit admin exists
    owner: ParticipantId,
    participants: HashMap<ParticipantId, Participant>,
    addresses: Vec<ParticipantId>,
}

impl IdentityRegistry {
    /// An empty registry at genesis
    pub fn new(owner: ParticipantId) -> Self {
        Self {
            owner,
            participants: HashMap::new(),
            addresses: Vec::new(),
        }
    }

    /// Rebuild a registry from stored entries
    pub fn from_parts(
        owner: ParticipantId,
        participants: impl IntoIterator<Item = Participant>,
        addresses: Vec<ParticipantId>,
    ) -> Self {
        Self {
            owner,
            participants: participants.into_iter().map(|p| (p.id, p)).collect(),
            addresses,
        }
    }

    pub fn owner(&self) -> &ParticipantId {
        &self.owner
    }

    pub fn role(&self, id: &ParticipantId) -> Role {
        self.participants
            .get(id)
            .map(|p| p.role)
            .unwrap_or_default()
    }

    pub fn name(&self, id: &ParticipantId) -> &str {
        self.participants
            .get(id)
            .map(|p| p.name.as_str())
            .unwrap_or("")
    }

    /// Full entry for `id`, zero-valued when unknown
    pub fn participant(&self, id: &ParticipantId) -> Participant {
        self.participants
            .get(id)
            .cloned()
            .unwrap_or_else(|| Participant::unknown(*id))
    }

    /// Every identity with an entry, ordered by id
    pub fn participants(&self) -> Vec<Participant> {
        let mut all: Vec<_> = self.participants.values().cloned().collect();
        all.sort_by(|a, b| a.id.cmp(&b.id));
        all
    }

    /// Enumeration list in append order, duplicates included
    pub fn addresses(&self) -> &[ParticipantId] {
        &self.addresses
    }

    pub fn address_at(&self, index: usize) -> Result<ParticipantId, LedgerError> {
        self.addresses
            .get(index)
            .copied()
            .ok_or_else(|| LedgerError::NotFound(format!("address index {}", index)))
    }

    fn has_explicit_admin(&self) -> bool {
        self.participants.values().any(|p| p.role == Role::Admin)
    }

    pub fn is_admin(&self, id: &ParticipantId) -> bool {
        self.role(id) == Role::Admin || (*id == self.owner && !self.has_explicit_admin())
    }

    /// Capability check run at the top of every gated operation
    pub fn require_role(&self, caller: &ParticipantId, expected: Role) -> Result<(), LedgerError> {
        let actual = self.role(caller);
        if actual == expected {
            Ok(())
        } else {
            Err(LedgerError::unauthorized(
                caller,
                AuthFailure::MissingRole {
                    required: expected,
                    actual,
                },
            ))
        }
    }

    pub fn require_admin(&self, caller: &ParticipantId) -> Result<(), LedgerError> {
        if self.is_admin(caller) {
            Ok(())
        } else {
            Err(LedgerError::unauthorized(caller, AuthFailure::NotAdmin))
        }
    }

    /// Set or overwrite role and display name of `identity`, appending it to
    /// the enumeration list.
    ///
    /// Reassignment is unconditional once the caller is authorized: an identity
    /// may be reassigned any number of times and appears once per call.
    pub fn plan_assign_role(
        &self,
        caller: &ParticipantId,
        identity: ParticipantId,
        role: Role,
        name: &str,
    ) -> Result<ChangeSet, LedgerError> {
        self.require_admin(caller)?;

        let mut changes = ChangeSet::new();
        changes.push(StateChange::PutParticipant(Participant::new(
            identity, role, name,
        )));
        changes.push(StateChange::AppendAddress(identity));
        Ok(changes)
    }

    /// Append `identity` to the enumeration list without touching its role
    pub fn plan_add_address(
        &self,
        caller: &ParticipantId,
        identity: ParticipantId,
    ) -> Result<ChangeSet, LedgerError> {
        self.require_admin(caller)?;

        let mut changes = ChangeSet::new();
        changes.push(StateChange::AppendAddress(identity));
        Ok(changes)
    }

    /// Apply a committed change; changes owned by other components are ignored
    pub fn apply(&mut self, change: &StateChange) {
        match change {
            StateChange::PutParticipant(participant) => {
                self.participants.insert(participant.id, participant.clone());
            }
            StateChange::AppendAddress(id) => self.addresses.push(*id),
            StateChange::SetOwner(owner) => self.owner = *owner,
            StateChange::PutBatch(_) | StateChange::SetBalance { .. } => {}
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::id::tests::participant;

    fn commit(registry: &mut IdentityRegistry, changes: ChangeSet) {
        for change in &changes {
            registry.apply(change);
        }
    }

    #[test]
    fn test_unknown_identity_lookups() {
        let registry = IdentityRegistry::new(participant("owner"));
        let stranger = participant("stranger");

        assert_eq!(registry.role(&stranger), Role::Unassigned);
        assert_eq!(registry.name(&stranger), "");
        assert!(registry.addresses().is_empty());
        assert!(matches!(
            registry.address_at(0),
            Err(LedgerError::NotFound(_))
        ));
    }

    #[test]
    fn test_owner_assigns_roles() {
        let owner = participant("owner");
        let farmer = participant("farmer");
        let mut registry = IdentityRegistry::new(owner);

        let changes = registry
            .plan_assign_role(&owner, farmer, Role::Farmer, "John")
            .unwrap();
        assert_eq!(changes.len(), 2);
        commit(&mut registry, changes);

        assert_eq!(registry.role(&farmer), Role::Farmer);
        assert_eq!(registry.name(&farmer), "John");
        assert_eq!(registry.addresses(), &[farmer]);
        assert_eq!(registry.address_at(0).unwrap(), farmer);
    }

    #[test]
    fn test_non_admin_cannot_assign() {
        let owner = participant("owner");
        let farmer = participant("farmer");
        let mut registry = IdentityRegistry::new(owner);
        let changes = registry
            .plan_assign_role(&owner, farmer, Role::Farmer, "John")
            .unwrap();
        commit(&mut registry, changes);

        let result = registry.plan_assign_role(&farmer, farmer, Role::Admin, "Mallory");
        assert!(matches!(
            result,
            Err(LedgerError::Unauthorized {
                reason: AuthFailure::NotAdmin,
                ..
            })
        ));
        assert_eq!(registry.role(&farmer), Role::Farmer);
        assert_eq!(registry.addresses().len(), 1);
    }

    #[test]
    fn test_reassignment_is_permissive() {
        let owner = participant("owner");
        let id = participant("shifty");
        let mut registry = IdentityRegistry::new(owner);

        for (role, name) in [
            (Role::Farmer, "A"),
            (Role::Processor, "B"),
            (Role::Farmer, "C"),
        ] {
            let changes = registry.plan_assign_role(&owner, id, role, name).unwrap();
            commit(&mut registry, changes);
        }

        assert_eq!(registry.role(&id), Role::Farmer);
        assert_eq!(registry.name(&id), "C");
        assert_eq!(registry.addresses(), &[id, id, id]);
        assert_eq!(registry.participants().len(), 1);
    }

    #[test]
    fn test_add_address_keeps_duplicates_and_order() {
        let owner = participant("owner");
        let ids: Vec<_> = ["farmer", "processor", "distributor", "retailer", "farmer"]
            .iter()
            .map(|n| participant(n))
            .collect();
        let mut registry = IdentityRegistry::new(owner);

        for id in &ids {
            let changes = registry.plan_add_address(&owner, *id).unwrap();
            commit(&mut registry, changes);
        }

        assert_eq!(registry.addresses(), ids.as_slice());
        assert_eq!(registry.role(&ids[0]), Role::Unassigned);
    }

    #[test]
    fn test_bootstrap_admin_yields_to_explicit_admin() {
        let owner = participant("owner");
        let admin = participant("admin");
        let mut registry = IdentityRegistry::new(owner);
        assert!(registry.is_admin(&owner));

        let changes = registry
            .plan_assign_role(&owner, admin, Role::Admin, "Ada")
            .unwrap();
        commit(&mut registry, changes);

        assert!(registry.is_admin(&admin));
        assert!(!registry.is_admin(&owner));
        assert!(registry.require_admin(&owner).is_err());
    }

    #[test]
    fn test_require_role() {
        let owner = participant("owner");
        let processor = participant("processor");
        let mut registry = IdentityRegistry::new(owner);
        let changes = registry
            .plan_assign_role(&owner, processor, Role::Processor, "Jane")
            .unwrap();
        commit(&mut registry, changes);

        assert!(registry.require_role(&processor, Role::Processor).is_ok());
        match registry.require_role(&processor, Role::Farmer) {
            Err(LedgerError::Unauthorized {
                caller,
                reason: AuthFailure::MissingRole { required, actual },
            }) => {
                assert_eq!(caller, processor);
                assert_eq!(required, Role::Farmer);
                assert_eq!(actual, Role::Processor);
            }
            other => panic!("unexpected result: {:?}", other),
        }
    }
}

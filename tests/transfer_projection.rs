//! End-to-end scenarios for the transfer projection.
//!
//! Exercises the account pipeline with hand-built atoms: incoming transfer,
//! spend with change, reorg rollback, and duplicate/orphan events.

use num_bigint::{BigInt, BigUint};
use std::collections::HashMap;
use std::sync::Arc;

use atom_light_client::account::MemoryAtomCache;
use atom_light_client::atom::particle::{TokenParticle, TokenParticleKind};
use atom_light_client::{
    Account, Address, Atom, AtomUpdate, Particle, SpunParticle, TokenClassRef, UpdateAction,
};

fn address_x() -> Address {
    Address::new("address-x")
}

fn address_y() -> Address {
    Address::new("address-y")
}

fn token_class() -> TokenClassRef {
    TokenClassRef::new(Address::new("issuer-1"), "T")
}

fn token(owner: &Address, amount: u64, nonce: u64) -> Particle {
    Particle::Token(TokenParticle {
        address: owner.clone(),
        amount: BigUint::from(amount),
        token_class: token_class(),
        granularity: BigUint::from(1u8),
        kind: TokenParticleKind::Transfer,
        nonce,
        planck: 0,
    })
}

/// Balance must equal the sum over the unspent set, grouped by token class.
async fn assert_consistent(account: &Account) {
    let mut computed: HashMap<TokenClassRef, BigInt> = HashMap::new();
    for particle in account.transfer().unspent_consumables().await {
        *computed
            .entry(particle.token_class.clone())
            .or_insert_with(|| BigInt::from(0)) += BigInt::from(particle.amount.clone());
    }
    computed.retain(|_, v| *v != BigInt::from(0));
    assert_eq!(computed, account.transfer().balance().await);
}

fn particle_ids(particles: &[TokenParticle]) -> Vec<String> {
    let mut ids: Vec<String> = particles
        .iter()
        .map(|p| Particle::Token(p.clone()).id().to_string())
        .collect();
    ids.sort();
    ids
}

/// Scenario A: a single incoming transfer of 100 T.
#[tokio::test]
async fn test_single_incoming_transfer() {
    let account = Account::new(address_x());
    let p1 = token(&address_x(), 100, 1);
    let a1 = Atom::new(1_000, vec![SpunParticle::up(p1.clone())]);

    account
        .process_atom_update(&AtomUpdate::store(a1))
        .await
        .unwrap();

    let balance = account.transfer().balance().await;
    assert_eq!(balance.get(&token_class()), Some(&BigInt::from(100)));

    let unspent = account.transfer().unspent_consumables().await;
    assert_eq!(particle_ids(&unspent), vec![p1.id().to_string()]);
    assert!(account.transfer().spent_consumables().await.is_empty());

    let (history, _) = account.transfer().transaction_history().await;
    assert_eq!(history.len(), 1);
    let transaction = &history[0].transaction;
    assert_eq!(
        transaction.balance.get(&token_class()),
        Some(&BigInt::from(100))
    );
    assert!(transaction.participants.is_empty());

    assert_consistent(&account).await;
}

/// Scenario B: spend the 100, keeping 30 as change, 70 going to Y.
#[tokio::test]
async fn test_spend_with_change() {
    let account = Account::new(address_x());
    let p1 = token(&address_x(), 100, 1);
    let p2 = token(&address_x(), 30, 2);
    let p3 = token(&address_y(), 70, 3);

    let a1 = Atom::new(1_000, vec![SpunParticle::up(p1.clone())]);
    let a2 = Atom::new(
        2_000,
        vec![
            SpunParticle::down(p1.clone()),
            SpunParticle::up(p2.clone()),
            SpunParticle::up(p3.clone()),
        ],
    );

    account
        .process_atom_update(&AtomUpdate::store(a1))
        .await
        .unwrap();
    account
        .process_atom_update(&AtomUpdate::store(a2.clone()))
        .await
        .unwrap();

    let balance = account.transfer().balance().await;
    assert_eq!(balance.get(&token_class()), Some(&BigInt::from(30)));

    let unspent = account.transfer().unspent_consumables().await;
    assert_eq!(particle_ids(&unspent), vec![p2.id().to_string()]);
    let spent = account.transfer().spent_consumables().await;
    assert_eq!(particle_ids(&spent), vec![p1.id().to_string()]);

    let (history, _) = account.transfer().transaction_history().await;
    let t2 = history
        .iter()
        .find(|u| u.hid == a2.hid())
        .expect("a2 transaction");
    assert_eq!(
        t2.transaction.balance.get(&token_class()),
        Some(&BigInt::from(-70))
    );
    assert_eq!(
        t2.transaction.participants.get(address_y().as_str()),
        Some(&address_y())
    );

    assert_consistent(&account).await;
}

/// Scenario C: a reorg deletes both atoms; every step lands exactly on an
/// earlier state, ending empty.
#[tokio::test]
async fn test_reorg_rolls_back_to_earlier_states() {
    let account = Account::new(address_x());
    let p1 = token(&address_x(), 100, 1);
    let p2 = token(&address_x(), 30, 2);
    let p3 = token(&address_y(), 70, 3);

    let a1 = Atom::new(1_000, vec![SpunParticle::up(p1.clone())]);
    let a2 = Atom::new(
        2_000,
        vec![
            SpunParticle::down(p1.clone()),
            SpunParticle::up(p2),
            SpunParticle::up(p3),
        ],
    );

    account
        .process_atom_update(&AtomUpdate::store(a1.clone()))
        .await
        .unwrap();

    let balance_after_a1 = account.transfer().balance().await;
    let unspent_after_a1 = particle_ids(&account.transfer().unspent_consumables().await);
    let spent_after_a1 = particle_ids(&account.transfer().spent_consumables().await);

    account
        .process_atom_update(&AtomUpdate::store(a2.clone()))
        .await
        .unwrap();
    account
        .process_atom_update(&AtomUpdate::delete(a2))
        .await
        .unwrap();

    assert_eq!(account.transfer().balance().await, balance_after_a1);
    assert_eq!(
        particle_ids(&account.transfer().unspent_consumables().await),
        unspent_after_a1
    );
    assert_eq!(
        particle_ids(&account.transfer().spent_consumables().await),
        spent_after_a1
    );
    assert_consistent(&account).await;

    account
        .process_atom_update(&AtomUpdate::delete(a1))
        .await
        .unwrap();

    assert!(account.transfer().balance().await.is_empty());
    assert!(account.transfer().unspent_consumables().await.is_empty());
    assert!(account.transfer().spent_consumables().await.is_empty());
    let (history, _) = account.transfer().transaction_history().await;
    assert!(history.is_empty());
}

/// Scenario D: a duplicate STORE is suppressed entirely.
#[tokio::test]
async fn test_duplicate_store_is_idempotent() {
    let account = Account::new(address_x());
    let a1 = Atom::new(1_000, vec![SpunParticle::up(token(&address_x(), 100, 1))]);

    let mut events = account.transfer().transaction_stream();

    account
        .process_atom_update(&AtomUpdate::store(a1.clone()))
        .await
        .unwrap();
    account
        .process_atom_update(&AtomUpdate::store(a1))
        .await
        .unwrap();

    let balance = account.transfer().balance().await;
    assert_eq!(balance.get(&token_class()), Some(&BigInt::from(100)));
    let (history, _) = account.transfer().transaction_history().await;
    assert_eq!(history.len(), 1);

    // Exactly one transaction event was emitted.
    assert!(events.try_recv().is_ok());
    assert!(events.try_recv().is_err());
}

/// An orphan DELETE leaves the projection untouched.
#[tokio::test]
async fn test_orphan_delete_is_a_noop() {
    let account = Account::new(address_x());
    let a1 = Atom::new(1_000, vec![SpunParticle::up(token(&address_x(), 100, 1))]);
    let orphan = Atom::new(2_000, vec![SpunParticle::up(token(&address_x(), 9, 9))]);

    account
        .process_atom_update(&AtomUpdate::store(a1))
        .await
        .unwrap();
    let balance_before = account.transfer().balance().await;

    account
        .process_atom_update(&AtomUpdate::delete(orphan))
        .await
        .unwrap();

    assert_eq!(account.transfer().balance().await, balance_before);
    assert_consistent(&account).await;
}

/// An atom whose token-bearing particles all belong to someone else moves
/// no balance and records exactly the foreign addresses as participants.
#[tokio::test]
async fn test_foreign_atom_only_records_participants() {
    let account = Account::new(address_x());
    let atom = Atom::new(
        1_000,
        vec![
            SpunParticle::up(token(&address_y(), 50, 1)),
            SpunParticle::up(token(&Address::new("address-z"), 5, 2)),
        ],
    );

    account
        .process_atom_update(&AtomUpdate::store(atom))
        .await
        .unwrap();

    assert!(account.transfer().balance().await.is_empty());
    assert!(account.transfer().unspent_consumables().await.is_empty());

    let (history, _) = account.transfer().transaction_history().await;
    let participants: Vec<&String> = {
        let mut keys: Vec<&String> = history[0].transaction.participants.keys().collect();
        keys.sort();
        keys
    };
    assert_eq!(participants, vec!["address-y", "address-z"]);
}

/// The balance subject already shows the new balance by the time the
/// transaction event for the same atom arrives.
#[tokio::test]
async fn test_balance_updates_before_transaction_event() {
    let account = Account::new(address_x());
    let balance_rx = account.transfer().balance_stream();
    let mut events = account.transfer().transaction_stream();

    let a1 = Atom::new(1_000, vec![SpunParticle::up(token(&address_x(), 100, 1))]);
    account
        .process_atom_update(&AtomUpdate::store(a1))
        .await
        .unwrap();

    let event = events.recv().await.unwrap();
    assert_eq!(event.action, UpdateAction::Store);
    assert_eq!(
        balance_rx.borrow().get(&token_class()),
        Some(&BigInt::from(100))
    );
}

/// Late subscribers to the transaction history see all earlier transactions
/// replayed as STORE events, then the live stream.
#[tokio::test]
async fn test_history_replays_then_goes_live() {
    let account = Account::new(address_x());
    let a1 = Atom::new(1_000, vec![SpunParticle::up(token(&address_x(), 100, 1))]);
    let a2 = Atom::new(2_000, vec![SpunParticle::up(token(&address_x(), 7, 2))]);

    account
        .process_atom_update(&AtomUpdate::store(a1.clone()))
        .await
        .unwrap();

    let (history, mut live) = account.transfer().transaction_history().await;
    assert_eq!(history.len(), 1);
    assert_eq!(history[0].hid, a1.hid());

    account
        .process_atom_update(&AtomUpdate::store(a2.clone()))
        .await
        .unwrap();

    let event = live.recv().await.unwrap();
    assert_eq!(event.hid, a2.hid());
}

/// An account built over a warm cache replays the cached atoms through the
/// full pipeline and ends up with the cached balance.
#[tokio::test]
async fn test_cache_replay_seeds_the_projection() {
    let provider = Arc::new(MemoryAtomCache::new());
    let a1 = Atom::new(1_000, vec![SpunParticle::up(token(&address_x(), 100, 1))]);

    // First session writes through to the cache.
    {
        let account = Account::with_cache(address_x(), Some(provider.clone()));
        account
            .process_atom_update(&AtomUpdate::store(a1))
            .await
            .unwrap();
    }

    // A fresh account over the same provider starts empty; replaying the
    // cached atoms (the same path Account::subscribe takes before going
    // live) restores the projection.
    let account = Account::with_cache(address_x(), Some(provider));
    assert!(account.transfer().balance().await.is_empty());

    for atom in account.cache().load().await.unwrap() {
        account
            .process_atom_update(&AtomUpdate::store(atom))
            .await
            .unwrap();
    }

    let balance = account.transfer().balance().await;
    assert_eq!(balance.get(&token_class()), Some(&BigInt::from(100)));
    assert_consistent(&account).await;
}

//! Stellarcade Fair Flip Contract
//!
//! A multiplayer, escrow-funded coin flip whose fairness rests on a
//! commit-reveal protocol. Every player locks in `keccak256(secret)` when
//! entering a game and reveals the secret once the game is full; the winner
//! is derived from the XOR of all revealed secrets (see [`outcome`]).
//!
//! ## Game Flow
//! 1. A creator calls `create_game` with a commitment, stake, player count
//!    and reveal window. The stake is pulled into the contract.
//! 2. Other players call `join_game` with their own commitment and the same
//!    stake. The join that fills the game opens the reveal window.
//! 3. Players call `reveal`. When the last player reveals, the game settles
//!    inside that call and the whole pot goes to the winner.
//! 4. Once the deadline passes anyone may call `settle`, which picks the
//!    winner among the players that did reveal. Stakes of silent players
//!    are forfeited into the pot.
//! 5. If a game is still unsettled `EMERGENCY_GRACE_PERIOD` after its
//!    deadline, anyone may call `emergency_refund` to return every stake.
//!
//! There is no cancel or leave: once a player has committed, the only exits
//! are settlement and the emergency refund.
//!
//! ## Storage Strategy
//! - `instance()`: Admin, Token. Fixed contract-level config.
//! - `persistent()`: one `Game(creator)` entry per live game, plus the
//!   `TotalEscrowed` counter. A settled or refunded game is removed, so the
//!   presence of the key is the "active" flag.
//!
//! ## Invariant
//! `TotalEscrowed == token.balance(contract_address)` while tokens only
//! enter through `create_game` and `join_game`. Each live game accounts for
//! exactly `bet_amount * players.len()` of that total.
#![no_std]
#![allow(unexpected_cfgs)]

pub mod outcome;

use soroban_sdk::{
    contract, contracterror, contractevent, contractimpl, contracttype, token::TokenClient, vec,
    Address, BytesN, Env, Vec,
};

use crate::outcome::{commitment_of, winner_index};

// ---------------------------------------------------------------------------
// Constants
// ---------------------------------------------------------------------------

/// Persistent storage TTL in ledgers (~30 days at 5 s/ledger).
pub const PERSISTENT_BUMP_LEDGERS: u32 = 518_400;

pub const MIN_PLAYERS: u32 = 2;
/// Upper bound on players per game. Bounds the loops in settlement and
/// refund.
pub const MAX_PLAYERS: u32 = 10;

/// Shortest accepted reveal window, in seconds.
pub const MIN_REVEAL_DURATION: u64 = 60;
/// Longest accepted reveal window, in seconds.
pub const MAX_REVEAL_DURATION: u64 = 3_600;

/// Delay after the reveal deadline before `emergency_refund` opens (7 days).
pub const EMERGENCY_GRACE_PERIOD: u64 = 7 * 24 * 60 * 60;

// ---------------------------------------------------------------------------
// Error Types
// ---------------------------------------------------------------------------

#[contracterror]
#[derive(Copy, Clone, Debug, Eq, PartialEq, PartialOrd, Ord)]
#[repr(u32)]
pub enum Error {
    AlreadyInitialized   = 1,
    NotInitialized       = 2,
    /// The commitment is the all-zero digest.
    InvalidCommitment    = 3,
    /// The creator already owns a game that has not been settled or refunded.
    AlreadyActiveGame    = 4,
    InvalidPlayerCount   = 5,
    InvalidDuration      = 6,
    InvalidAmount        = 7,
    GameNotFound         = 8,
    GameFull             = 9,
    AlreadyJoined        = 10,
    /// The secret does not hash to the caller's commitment, or the caller
    /// is not a player of the game.
    InvalidReveal        = 11,
    AlreadyRevealed      = 12,
    /// The reveal window has closed, or has not opened because the game
    /// is not full yet.
    RevealPeriodEnded    = 13,
    /// `settle` was called before the reveal deadline.
    RevealPeriodActive   = 14,
    NoReveals            = 15,
    /// No game with an open or elapsed reveal window exists for the creator.
    GameNotStarted       = 16,
    TooEarlyForEmergency = 17,
    Overflow             = 18,
}

// ---------------------------------------------------------------------------
// Storage Types
// ---------------------------------------------------------------------------

#[contracttype]
#[derive(Clone)]
pub enum DataKey {
    // --- instance() ---
    Admin,
    Token,
    // --- persistent() ---
    /// Sum of all stakes held for live games.
    TotalEscrowed,
    /// The live game owned by a creator.
    Game(Address),
}

#[contracttype]
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum GameState {
    /// Waiting for players; no reveal deadline yet.
    Filling = 0,
    /// Full; reveals accepted until the deadline.
    Revealing = 1,
}

#[contracttype]
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct Player {
    pub address: Address,
    pub commitment: BytesN<32>,
    /// Set only by a reveal that matched `commitment`.
    pub secret: Option<BytesN<32>>,
    pub has_revealed: bool,
}

#[contracttype]
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct Game {
    pub creator: Address,
    pub bet_amount: i128,
    pub max_players: u32,
    pub reveal_duration: u64,
    /// Set once, when the last seat is taken.
    pub reveal_deadline: Option<u64>,
    pub state: GameState,
    /// Join order; the creator is always first.
    pub players: Vec<Player>,
}

/// Summary returned by `get_game_info`.
#[contracttype]
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct GameInfo {
    pub bet_amount: i128,
    pub max_players: u32,
    pub current_players: u32,
    pub reveal_duration: u64,
    pub reveal_deadline: Option<u64>,
    pub state: GameState,
    /// Always `true`; a settled or refunded game reads as `GameNotFound`.
    pub is_active: bool,
}

#[contracttype]
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct FlipConfig {
    pub min_players: u32,
    pub max_players: u32,
    pub min_reveal_duration: u64,
    pub max_reveal_duration: u64,
    pub emergency_grace_period: u64,
}

// ---------------------------------------------------------------------------
// Events
// ---------------------------------------------------------------------------

#[contractevent]
pub struct Initialized {
    #[topic]
    pub admin: Address,
    pub token: Address,
}

#[contractevent]
pub struct GameCreated {
    #[topic]
    pub creator: Address,
    pub bet_amount: i128,
    pub max_players: u32,
    pub reveal_duration: u64,
}

#[contractevent]
pub struct PlayerJoined {
    #[topic]
    pub creator: Address,
    #[topic]
    pub player: Address,
    pub player_count: u32,
}

#[contractevent]
pub struct RevealStarted {
    #[topic]
    pub creator: Address,
    pub reveal_deadline: u64,
}

#[contractevent]
pub struct PlayerRevealed {
    #[topic]
    pub creator: Address,
    #[topic]
    pub player: Address,
}

#[contractevent]
pub struct GameSettled {
    #[topic]
    pub creator: Address,
    #[topic]
    pub winner: Address,
    pub pot: i128,
    pub revealers: u32,
}

#[contractevent]
pub struct PlayerRefunded {
    #[topic]
    pub creator: Address,
    #[topic]
    pub player: Address,
    pub amount: i128,
}

// ---------------------------------------------------------------------------
// Contract
// ---------------------------------------------------------------------------

#[contract]
pub struct FairFlip;

#[contractimpl]
impl FairFlip {
    // -----------------------------------------------------------------------
    // init
    // -----------------------------------------------------------------------

    /// Initialize the contract. May only be called once.
    ///
    /// `token` is the SEP-41 token every stake is paid in.
    pub fn init(env: Env, admin: Address, token: Address) -> Result<(), Error> {
        if env.storage().instance().has(&DataKey::Admin) {
            return Err(Error::AlreadyInitialized);
        }

        admin.require_auth();

        env.storage().instance().set(&DataKey::Admin, &admin);
        env.storage().instance().set(&DataKey::Token, &token);
        set_persistent_i128(&env, DataKey::TotalEscrowed, 0);

        Initialized { admin, token }.publish(&env);

        Ok(())
    }

    // -----------------------------------------------------------------------
    // create_game
    // -----------------------------------------------------------------------

    /// Open a game owned by `creator`, escrowing the creator's stake.
    ///
    /// `commitment` is `keccak256(secret)` for the creator's 32-byte secret.
    /// A creator may own at most one live game at a time.
    pub fn create_game(
        env: Env,
        creator: Address,
        commitment: BytesN<32>,
        bet_amount: i128,
        max_players: u32,
        reveal_duration: u64,
    ) -> Result<(), Error> {
        require_initialized(&env)?;
        creator.require_auth();

        let game_key = DataKey::Game(creator.clone());
        if env.storage().persistent().has(&game_key) {
            return Err(Error::AlreadyActiveGame);
        }
        require_commitment(&env, &commitment)?;
        if bet_amount <= 0 {
            return Err(Error::InvalidAmount);
        }
        if !(MIN_PLAYERS..=MAX_PLAYERS).contains(&max_players) {
            return Err(Error::InvalidPlayerCount);
        }
        if !(MIN_REVEAL_DURATION..=MAX_REVEAL_DURATION).contains(&reveal_duration) {
            return Err(Error::InvalidDuration);
        }
        // A full pot must be representable before any stake is taken.
        bet_amount
            .checked_mul(max_players as i128)
            .ok_or(Error::Overflow)?;

        escrow_stake(&env, &creator, bet_amount)?;

        let game = Game {
            creator: creator.clone(),
            bet_amount,
            max_players,
            reveal_duration,
            reveal_deadline: None,
            state: GameState::Filling,
            players: vec![&env, committed_player(creator.clone(), commitment)],
        };
        save_game(&env, &game);

        GameCreated {
            creator,
            bet_amount,
            max_players,
            reveal_duration,
        }
        .publish(&env);

        Ok(())
    }

    // -----------------------------------------------------------------------
    // join_game
    // -----------------------------------------------------------------------

    /// Join `creator`'s game with `commitment`, escrowing the game's stake.
    ///
    /// The join that takes the last seat fixes the reveal deadline at
    /// `now + reveal_duration`.
    pub fn join_game(
        env: Env,
        player: Address,
        creator: Address,
        commitment: BytesN<32>,
    ) -> Result<(), Error> {
        require_initialized(&env)?;
        player.require_auth();

        let mut game = load_game(&env, &creator)?;
        if game.players.len() >= game.max_players {
            return Err(Error::GameFull);
        }
        if player_index(&game.players, &player).is_some() {
            return Err(Error::AlreadyJoined);
        }
        require_commitment(&env, &commitment)?;

        escrow_stake(&env, &player, game.bet_amount)?;

        game.players
            .push_back(committed_player(player.clone(), commitment));
        let player_count = game.players.len();

        let mut opened_deadline = None;
        if player_count == game.max_players {
            let deadline = env
                .ledger()
                .timestamp()
                .checked_add(game.reveal_duration)
                .ok_or(Error::Overflow)?;
            game.reveal_deadline = Some(deadline);
            game.state = GameState::Revealing;
            opened_deadline = Some(deadline);
        }
        save_game(&env, &game);

        PlayerJoined {
            creator: creator.clone(),
            player,
            player_count,
        }
        .publish(&env);

        if let Some(reveal_deadline) = opened_deadline {
            RevealStarted {
                creator,
                reveal_deadline,
            }
            .publish(&env);
        }

        Ok(())
    }

    // -----------------------------------------------------------------------
    // reveal
    // -----------------------------------------------------------------------

    /// Reveal `player`'s secret for `creator`'s game.
    ///
    /// Accepted while `now <= reveal_deadline`, and only once the game is
    /// full. If this is the last
    /// outstanding reveal the game settles in the same call.
    pub fn reveal(
        env: Env,
        player: Address,
        creator: Address,
        secret: BytesN<32>,
    ) -> Result<(), Error> {
        require_initialized(&env)?;
        player.require_auth();

        let mut game = load_game(&env, &creator)?;
        // A filling game has no reveal window yet.
        let deadline = game.reveal_deadline.ok_or(Error::RevealPeriodEnded)?;
        if env.ledger().timestamp() > deadline {
            return Err(Error::RevealPeriodEnded);
        }

        let index = player_index(&game.players, &player).ok_or(Error::InvalidReveal)?;
        let mut entry = game.players.get(index).ok_or(Error::InvalidReveal)?;
        if entry.has_revealed {
            return Err(Error::AlreadyRevealed);
        }
        if commitment_of(&env, &secret) != entry.commitment {
            return Err(Error::InvalidReveal);
        }

        entry.secret = Some(secret);
        entry.has_revealed = true;
        game.players.set(index, entry);

        PlayerRevealed {
            creator,
            player,
        }
        .publish(&env);

        if game.players.iter().all(|p| p.has_revealed) {
            settle_game(&env, game)?;
        } else {
            save_game(&env, &game);
        }

        Ok(())
    }

    // -----------------------------------------------------------------------
    // settle
    // -----------------------------------------------------------------------

    /// Settle `creator`'s game among the players who revealed. Anyone can
    /// call this once the reveal deadline has been reached.
    ///
    /// Returns the winner.
    pub fn settle(env: Env, creator: Address) -> Result<Address, Error> {
        require_initialized(&env)?;

        let (game, deadline) = load_started_game(&env, &creator)?;
        if env.ledger().timestamp() < deadline {
            return Err(Error::RevealPeriodActive);
        }

        settle_game(&env, game)
    }

    // -----------------------------------------------------------------------
    // emergency_refund
    // -----------------------------------------------------------------------

    /// Return every player's stake and clear the game. Anyone can call this
    /// once `EMERGENCY_GRACE_PERIOD` has passed since the reveal deadline,
    /// whatever the reveal status.
    pub fn emergency_refund(env: Env, creator: Address) -> Result<(), Error> {
        require_initialized(&env)?;

        let (game, deadline) = load_started_game(&env, &creator)?;
        let unlock_at = deadline
            .checked_add(EMERGENCY_GRACE_PERIOD)
            .ok_or(Error::Overflow)?;
        if env.ledger().timestamp() < unlock_at {
            return Err(Error::TooEarlyForEmergency);
        }

        let escrowed = pot_of(&game)?;
        clear_game(&env, &creator, escrowed)?;

        let token = TokenClient::new(&env, &get_token(&env)?);
        let contract = env.current_contract_address();
        for player in game.players.iter() {
            token.transfer(&contract, &player.address, &game.bet_amount);
            PlayerRefunded {
                creator: creator.clone(),
                player: player.address,
                amount: game.bet_amount,
            }
            .publish(&env);
        }

        Ok(())
    }

    // -----------------------------------------------------------------------
    // Views
    // -----------------------------------------------------------------------

    pub fn has_active_game(env: Env, creator: Address) -> bool {
        env.storage().persistent().has(&DataKey::Game(creator))
    }

    pub fn get_game_info(env: Env, creator: Address) -> Result<GameInfo, Error> {
        let game = load_game(&env, &creator)?;
        Ok(GameInfo {
            bet_amount: game.bet_amount,
            max_players: game.max_players,
            current_players: game.players.len(),
            reveal_duration: game.reveal_duration,
            reveal_deadline: game.reveal_deadline,
            state: game.state,
            is_active: true,
        })
    }

    /// Player addresses in join order.
    pub fn get_game_players(env: Env, creator: Address) -> Result<Vec<Address>, Error> {
        let game = load_game(&env, &creator)?;
        let mut players = Vec::new(&env);
        for p in game.players.iter() {
            players.push_back(p.address);
        }
        Ok(players)
    }

    /// `false` for addresses that are not in the game.
    pub fn has_player_revealed(env: Env, creator: Address, player: Address) -> Result<bool, Error> {
        let game = load_game(&env, &creator)?;
        Ok(game
            .players
            .iter()
            .any(|p| p.address == player && p.has_revealed))
    }

    /// The secret `player` revealed, if any. Together with the join order
    /// this is enough for anyone to recompute the winner.
    pub fn get_revealed_secret(
        env: Env,
        creator: Address,
        player: Address,
    ) -> Result<Option<BytesN<32>>, Error> {
        let game = load_game(&env, &creator)?;
        Ok(game
            .players
            .iter()
            .find(|p| p.address == player)
            .and_then(|p| p.secret))
    }

    pub fn get_total_escrowed(env: Env) -> i128 {
        total_escrowed(&env)
    }

    pub fn get_token(env: Env) -> Result<Address, Error> {
        get_token(&env)
    }

    pub fn get_config(_env: Env) -> FlipConfig {
        FlipConfig {
            min_players: MIN_PLAYERS,
            max_players: MAX_PLAYERS,
            min_reveal_duration: MIN_REVEAL_DURATION,
            max_reveal_duration: MAX_REVEAL_DURATION,
            emergency_grace_period: EMERGENCY_GRACE_PERIOD,
        }
    }
}

// ---------------------------------------------------------------------------
// Settlement
// ---------------------------------------------------------------------------

/// Pay the whole pot to the winner among `game`'s revealers.
///
/// The game record is removed and the escrow counter lowered before the
/// outbound token transfer is issued.
fn settle_game(env: &Env, game: Game) -> Result<Address, Error> {
    let mut revealers: Vec<Address> = Vec::new(env);
    let mut secrets: Vec<BytesN<32>> = Vec::new(env);
    for p in game.players.iter() {
        if let (true, Some(secret)) = (p.has_revealed, p.secret) {
            revealers.push_back(p.address);
            secrets.push_back(secret);
        }
    }

    let index = winner_index(env, &secrets).ok_or(Error::NoReveals)?;
    let winner = revealers.get(index).ok_or(Error::NoReveals)?;
    let pot = pot_of(&game)?;

    clear_game(env, &game.creator, pot)?;

    TokenClient::new(env, &get_token(env)?).transfer(
        &env.current_contract_address(),
        &winner,
        &pot,
    );

    GameSettled {
        creator: game.creator,
        winner: winner.clone(),
        pot,
        revealers: revealers.len(),
    }
    .publish(env);

    Ok(winner)
}

fn pot_of(game: &Game) -> Result<i128, Error> {
    game.bet_amount
        .checked_mul(game.players.len() as i128)
        .ok_or(Error::Overflow)
}

// ---------------------------------------------------------------------------
// Escrow
// ---------------------------------------------------------------------------

/// Pull `amount` from `from` into contract custody.
fn escrow_stake(env: &Env, from: &Address, amount: i128) -> Result<(), Error> {
    let new_total = total_escrowed(env)
        .checked_add(amount)
        .ok_or(Error::Overflow)?;

    TokenClient::new(env, &get_token(env)?).transfer(
        from,
        env.current_contract_address(),
        &amount,
    );
    set_persistent_i128(env, DataKey::TotalEscrowed, new_total);

    Ok(())
}

/// Remove `creator`'s game and release `escrowed` from the counter.
fn clear_game(env: &Env, creator: &Address, escrowed: i128) -> Result<(), Error> {
    let new_total = total_escrowed(env)
        .checked_sub(escrowed)
        .ok_or(Error::Overflow)?;
    env.storage()
        .persistent()
        .remove(&DataKey::Game(creator.clone()));
    set_persistent_i128(env, DataKey::TotalEscrowed, new_total);
    Ok(())
}

// ---------------------------------------------------------------------------
// Internal helpers
// ---------------------------------------------------------------------------

fn require_initialized(env: &Env) -> Result<(), Error> {
    if !env.storage().instance().has(&DataKey::Admin) {
        return Err(Error::NotInitialized);
    }
    Ok(())
}

fn require_commitment(env: &Env, commitment: &BytesN<32>) -> Result<(), Error> {
    if *commitment == BytesN::from_array(env, &[0u8; 32]) {
        return Err(Error::InvalidCommitment);
    }
    Ok(())
}

fn committed_player(address: Address, commitment: BytesN<32>) -> Player {
    Player {
        address,
        commitment,
        secret: None,
        has_revealed: false,
    }
}

fn player_index(players: &Vec<Player>, who: &Address) -> Option<u32> {
    players
        .iter()
        .position(|p| p.address == *who)
        .map(|i| i as u32)
}

fn get_token(env: &Env) -> Result<Address, Error> {
    env.storage()
        .instance()
        .get(&DataKey::Token)
        .ok_or(Error::NotInitialized)
}

fn total_escrowed(env: &Env) -> i128 {
    env.storage()
        .persistent()
        .get(&DataKey::TotalEscrowed)
        .unwrap_or(0)
}

fn load_game(env: &Env, creator: &Address) -> Result<Game, Error> {
    env.storage()
        .persistent()
        .get(&DataKey::Game(creator.clone()))
        .ok_or(Error::GameNotFound)
}

/// A game whose reveal window has opened, with its deadline.
fn load_started_game(env: &Env, creator: &Address) -> Result<(Game, u64), Error> {
    let game: Game = env
        .storage()
        .persistent()
        .get(&DataKey::Game(creator.clone()))
        .ok_or(Error::GameNotStarted)?;
    let deadline = game.reveal_deadline.ok_or(Error::GameNotStarted)?;
    Ok((game, deadline))
}

fn save_game(env: &Env, game: &Game) {
    let key = DataKey::Game(game.creator.clone());
    env.storage().persistent().set(&key, game);
    env.storage()
        .persistent()
        .extend_ttl(&key, PERSISTENT_BUMP_LEDGERS, PERSISTENT_BUMP_LEDGERS);
}

fn set_persistent_i128(env: &Env, key: DataKey, value: i128) {
    env.storage().persistent().set(&key, &value);
    env.storage()
        .persistent()
        .extend_ttl(&key, PERSISTENT_BUMP_LEDGERS, PERSISTENT_BUMP_LEDGERS);
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

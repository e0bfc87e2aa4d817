//! Account service models

pub mod authority;
pub mod ledger;
pub mod user;

// Re-export for convenience
pub use authority::{Authority, AuthorityRecord, UnknownAuthority};
pub use ledger::{BankAccount, NewBankAccount, NewOperation, Operation, OperationWithAccount};
pub use user::{
    AdminUserDto, KeyAndPassword, ManagedUserVm, NewUser, PasswordChange, User, UserDto,
    UserWithAuthorities,
};

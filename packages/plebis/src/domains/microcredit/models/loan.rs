use anyhow::Result;
use chrono::{DateTime, Months, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use sqlx::types::Json;
use sqlx::PgPool;
use typed_builder::TypedBuilder;

use crate::common::utils::{
    email_error, iban_valid, is_spanish_iban, normalize_iban, sha256_hex, spanish_bic,
    validate_nie, validate_nif,
};
use crate::common::validation::{BLANK, INVALID, NOT_INCLUDED};
use crate::common::{
    is_blank, MicrocreditId, MicrocreditLoanId, MicrocreditOptionId, ModelError, UserId,
    ValidationErrors,
};
use crate::domains::users::{DocumentType, User};

use super::microcredit::Microcredit;
use super::option::MicrocreditOption;

pub const MAX_LOANS_PER_IP: i64 = 50;
pub const MAX_LOANS_PER_DOCUMENT: i64 = 30;
pub const MAX_AMOUNT_PER_DOCUMENT: i64 = 10_000;
pub const MINIMUM_AGE: u32 = 18;

pub const NOT_ACCEPTED: &str = "debe ser aceptado";
pub const INVALID_IBAN: &str =
    "Cuenta corriente inválida. Dígito de control erroneo. Por favor revísala.";
pub const CAMPAIGN_ACCOUNT: &str =
    "Debes indicar tu cuenta corriente, no la de la campaña de microcréditos.";
pub const CAMPAIGN_INACTIVE: &str = "La campaña de microcréditos no está activa en este momento.";
pub const AMOUNT_EXHAUSTED: &str = "Lamentablemente, ya no quedan préstamos por esa cantidad.";
pub const LENDER_LIMIT: &str = "Lamentablemente, no es posible suscribir este microcrédito.";
pub const OPTION_NOT_LEAF: &str = "Debes elegir algún elemento";
pub const PASSPORT_USER: &str = "No puedes suscribir un microcrédito si no dispones de DNI o NIE.";
pub const UNDERAGE_USER: &str = "No puedes suscribir un microcrédito si eres menor de edad.";

/// Contact details of a lender without a user account.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct LenderData {
    pub first_name: String,
    pub last_name: String,
    pub email: String,
    pub address: String,
    pub postal_code: String,
    pub town: String,
    pub province: String,
    pub country: String,
}

impl LenderData {
    pub fn from_user(user: &User) -> Self {
        Self {
            first_name: user.first_name.clone(),
            last_name: user.last_name.clone(),
            email: user.email.clone(),
            country: user.country.clone(),
            ..Self::default()
        }
    }

    fn validate(&self, errors: &mut ValidationErrors) {
        errors.require_present("first_name", Some(&self.first_name));
        errors.require_present("last_name", Some(&self.last_name));
        errors.require_present("email", Some(&self.email));
        if let Some(message) = email_error(&self.email) {
            errors.add("email", message);
        }
        errors.require_present("address", Some(&self.address));
        errors.require_present("postal_code", Some(&self.postal_code));
        errors.require_present("town", Some(&self.town));
        errors.require_present("province", Some(&self.province));
        errors.require_present("country", Some(&self.country));
    }
}

/// A member's loan to a microcredit campaign.
#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct MicrocreditLoan {
    pub id: MicrocreditLoanId,
    pub microcredit_id: MicrocreditId,
    pub microcredit_option_id: Option<MicrocreditOptionId>,
    pub user_id: Option<UserId>,
    pub amount: i32,
    pub document_vatid: String,
    /// Lender details, kept only for loans without a user
    pub user_data: Option<Json<LenderData>>,
    pub iban_account: String,
    pub iban_bic: Option<String>,
    pub ip: Option<String>,
    pub confirmed_at: Option<DateTime<Utc>>,
    pub counted_at: Option<DateTime<Utc>>,
    pub discarded_at: Option<DateTime<Utc>>,
    pub returned_at: Option<DateTime<Utc>>,
    pub transferred_to_id: Option<MicrocreditLoanId>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub deleted_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, TypedBuilder)]
#[builder(field_defaults(setter(into)))]
pub struct NewMicrocreditLoan {
    pub microcredit_id: MicrocreditId,
    #[builder(default)]
    pub microcredit_option_id: Option<MicrocreditOptionId>,
    /// Lender with an account; their document and name are used
    #[builder(default)]
    pub user: Option<User>,
    #[builder(default)]
    pub amount: Option<i32>,
    #[builder(default)]
    pub document_vatid: String,
    #[builder(default)]
    pub lender: LenderData,
    pub iban_account: String,
    #[builder(default)]
    pub iban_bic: Option<String>,
    #[builder(default)]
    pub ip: Option<String>,
    #[builder(default)]
    pub terms_of_service: bool,
    #[builder(default)]
    pub minimal_year_old: bool,
}

fn is_adult(born_at: NaiveDate, today: NaiveDate) -> bool {
    born_at
        .checked_add_months(Months::new(MINIMUM_AGE * 12))
        .is_some_and(|adult| adult <= today)
}

impl NewMicrocreditLoan {
    /// Uppercase document, taken from the user when there is one.
    pub fn document(&self) -> String {
        let document = match &self.user {
            Some(user) => user.document_vatid.as_str(),
            None => self.document_vatid.as_str(),
        };
        document.trim().to_uppercase()
    }

    pub fn iban(&self) -> String {
        normalize_iban(&self.iban_account)
    }

    /// Given BIC, or the one of the Spanish bank behind the IBAN.
    pub fn bic(&self) -> Option<String> {
        self.iban_bic
            .as_deref()
            .map(str::trim)
            .filter(|bic| !bic.is_empty())
            .map(str::to_uppercase)
            .or_else(|| spanish_bic(&self.iban_account).map(str::to_string))
    }

    pub fn is_bank_international(&self) -> bool {
        !is_spanish_iban(&self.iban_account)
    }

    pub fn lender_data(&self) -> LenderData {
        match &self.user {
            Some(user) => LenderData::from_user(user),
            None => self.lender.clone(),
        }
    }

    /// Checks that need only the loan and its campaign.
    pub fn validate(&self, campaign: &Microcredit, now: DateTime<Utc>) -> ValidationErrors {
        let mut errors = ValidationErrors::new();

        match self.amount {
            None => errors.add("amount", BLANK),
            Some(amount) if amount <= 0 => errors.add("amount", "must be greater than 0"),
            Some(_) => {}
        }
        if !self.terms_of_service {
            errors.add("terms_of_service", NOT_ACCEPTED);
        }
        if !self.minimal_year_old {
            errors.add("minimal_year_old", NOT_ACCEPTED);
        }

        let iban = self.iban();
        if iban.is_empty() {
            errors.add("iban_account", BLANK);
        } else if !iban_valid(&iban) {
            errors.add("iban_account", INVALID_IBAN);
        } else if campaign
            .account_number
            .as_deref()
            .is_some_and(|account| normalize_iban(account) == iban)
        {
            errors.add("iban_account", CAMPAIGN_ACCOUNT);
        }
        if !iban.is_empty() && self.is_bank_international() && self.bic().is_none() {
            errors.add("iban_bic", BLANK);
        }

        match &self.user {
            Some(user) => {
                if user.document() == Some(DocumentType::Passport) {
                    errors.add("user", PASSPORT_USER);
                }
                if user.born_at.is_some_and(|born| !is_adult(born, now.date_naive())) {
                    errors.add("user", UNDERAGE_USER);
                }
            }
            None => {
                let document = self.document();
                if !(validate_nif(&document) || validate_nie(&document)) {
                    errors.add("document_vatid", INVALID);
                }
                self.lender.validate(&mut errors);
            }
        }

        if !campaign.is_active(now) {
            errors.add("microcredit", CAMPAIGN_INACTIVE);
        }
        errors
    }
}

/// Named subsets of a campaign's loans.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LoanScope {
    Counted,
    NotCounted,
    Confirmed,
    NotConfirmed,
    Discarded,
    NotDiscarded,
    Returned,
    /// Confirmed and still owed
    NotReturned,
    Transferred,
    /// Not discarded, or discarded after being counted
    IgnoreDiscarded,
}

impl LoanScope {
    fn condition(self) -> &'static str {
        match self {
            Self::Counted => "counted_at IS NOT NULL",
            Self::NotCounted => "counted_at IS NULL",
            Self::Confirmed => "confirmed_at IS NOT NULL",
            Self::NotConfirmed => "confirmed_at IS NULL",
            Self::Discarded => "discarded_at IS NOT NULL",
            Self::NotDiscarded => "discarded_at IS NULL",
            Self::Returned => "returned_at IS NOT NULL",
            Self::NotReturned => "confirmed_at IS NOT NULL AND returned_at IS NULL",
            Self::Transferred => "transferred_to_id IS NOT NULL",
            Self::IgnoreDiscarded => "(discarded_at IS NULL OR counted_at IS NOT NULL)",
        }
    }

    pub fn includes(self, loan: &MicrocreditLoan) -> bool {
        match self {
            Self::Counted => loan.counted_at.is_some(),
            Self::NotCounted => loan.counted_at.is_none(),
            Self::Confirmed => loan.confirmed_at.is_some(),
            Self::NotConfirmed => loan.confirmed_at.is_none(),
            Self::Discarded => loan.discarded_at.is_some(),
            Self::NotDiscarded => loan.discarded_at.is_none(),
            Self::Returned => loan.returned_at.is_some(),
            Self::NotReturned => loan.confirmed_at.is_some() && loan.returned_at.is_none(),
            Self::Transferred => loan.transferred_to_id.is_some(),
            Self::IgnoreDiscarded => loan.discarded_at.is_none() || loan.counted_at.is_some(),
        }
    }
}

/// Totals over the loans of one or more campaigns. Discarded loans that
/// were never counted only show up in the `*_discarded` figures.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, sqlx::FromRow)]
pub struct LoanStats {
    pub count: i64,
    pub count_confirmed: i64,
    pub count_counted: i64,
    pub count_discarded: i64,
    pub amount: i64,
    pub amount_confirmed: i64,
    pub amount_counted: i64,
    pub amount_discarded: i64,
    #[serde(rename = "unique")]
    pub unique_lenders: i64,
    pub unique_confirmed: i64,
}

impl MicrocreditLoan {
    pub fn has_user(&self) -> bool {
        self.user_id.is_some()
    }

    pub fn lender_data(&self) -> Option<&LenderData> {
        self.user_data.as_ref().map(|data| &data.0)
    }

    pub fn is_bank_international(&self) -> bool {
        !is_spanish_iban(&self.iban_account)
    }

    pub fn iban_valid(&self) -> bool {
        iban_valid(&self.iban_account)
    }

    /// Confirmed, still owed, and its campaign allows renewals.
    pub fn is_renewable(&self, campaign: &Microcredit) -> bool {
        campaign.renewable && self.confirmed_at.is_some() && self.returned_at.is_none()
    }

    /// Stable token that lets the lender act on the loan without logging in.
    pub fn unique_hash(&self, secret: &str) -> String {
        sha256_hex(&format!(
            "{}:{}:{}:{}",
            secret,
            self.id,
            self.document_vatid,
            self.created_at.timestamp()
        ))
    }
}

// =============================================================================
// SQL Queries
// =============================================================================

impl MicrocreditLoan {
    pub async fn find_by_id(id: MicrocreditLoanId, pool: &PgPool) -> Result<Self> {
        sqlx::query_as::<_, Self>(
            "SELECT * FROM microcredit_loans WHERE id = $1 AND deleted_at IS NULL",
        )
        .bind(id)
        .fetch_one(pool)
        .await
        .map_err(Into::into)
    }

    /// Includes soft-deleted loans
    pub async fn find_with_deleted(id: MicrocreditLoanId, pool: &PgPool) -> Result<Self> {
        sqlx::query_as::<_, Self>("SELECT * FROM microcredit_loans WHERE id = $1")
            .bind(id)
            .fetch_one(pool)
            .await
            .map_err(Into::into)
    }

    pub async fn find_in_scope(
        microcredit_id: MicrocreditId,
        scope: LoanScope,
        pool: &PgPool,
    ) -> Result<Vec<Self>> {
        let query = format!(
            "SELECT * FROM microcredit_loans WHERE microcredit_id = $1 AND deleted_at IS NULL AND {} ORDER BY created_at",
            scope.condition()
        );
        sqlx::query_as::<_, Self>(&query)
            .bind(microcredit_id)
            .fetch_all(pool)
            .await
            .map_err(Into::into)
    }

    /// Loans later renewed into this one
    pub async fn original_loans(&self, pool: &PgPool) -> Result<Vec<Self>> {
        sqlx::query_as::<_, Self>(
            "SELECT * FROM microcredit_loans WHERE transferred_to_id = $1 AND deleted_at IS NULL",
        )
        .bind(self.id)
        .fetch_all(pool)
        .await
        .map_err(Into::into)
    }

    /// User whose document matches a loan made without an account.
    pub async fn possible_user(&self, pool: &PgPool) -> Result<Option<User>> {
        User::find_by_document_vatid(&self.document_vatid, pool).await
    }

    async fn count_counted_with_amount(
        microcredit_id: MicrocreditId,
        amount: i32,
        pool: &PgPool,
    ) -> Result<i64> {
        sqlx::query_scalar(
            r#"
            SELECT COUNT(*) FROM microcredit_loans
            WHERE microcredit_id = $1 AND amount = $2
              AND counted_at IS NOT NULL AND deleted_at IS NULL
            "#,
        )
        .bind(microcredit_id)
        .bind(amount)
        .fetch_one(pool)
        .await
        .map_err(Into::into)
    }

    async fn count_confirmed_from_ip(
        microcredit_id: MicrocreditId,
        ip: &str,
        pool: &PgPool,
    ) -> Result<i64> {
        sqlx::query_scalar(
            r#"
            SELECT COUNT(*) FROM microcredit_loans
            WHERE microcredit_id = $1 AND ip = $2
              AND confirmed_at IS NOT NULL AND deleted_at IS NULL
            "#,
        )
        .bind(microcredit_id)
        .bind(ip)
        .fetch_one(pool)
        .await
        .map_err(Into::into)
    }

    /// Number and total amount of the lender's live loans in the campaign.
    async fn document_totals(
        microcredit_id: MicrocreditId,
        document_vatid: &str,
        pool: &PgPool,
    ) -> Result<(i64, i64)> {
        sqlx::query_as::<_, (i64, i64)>(
            r#"
            SELECT COUNT(*), COALESCE(SUM(amount), 0)::BIGINT FROM microcredit_loans
            WHERE microcredit_id = $1 AND upper(document_vatid) = upper($2)
              AND deleted_at IS NULL AND (discarded_at IS NULL OR counted_at IS NOT NULL)
            "#,
        )
        .bind(microcredit_id)
        .bind(document_vatid)
        .fetch_one(pool)
        .await
        .map_err(Into::into)
    }

    /// Validates against the campaign, its amount limits and the per-lender
    /// caps, then stores the loan.
    pub async fn create(new: &NewMicrocreditLoan, now: DateTime<Utc>, pool: &PgPool) -> Result<Self> {
        let campaign = Microcredit::find_by_id(new.microcredit_id, pool).await?;
        let mut errors = new.validate(&campaign, now);

        match new.microcredit_option_id {
            Some(option_id) => {
                let option = MicrocreditOption::find_by_id(option_id, pool).await?;
                if option.microcredit_id != campaign.id || !option.children(pool).await?.is_empty() {
                    errors.add("microcredit_option_id", OPTION_NOT_LEAF);
                }
            }
            None => {
                if !MicrocreditOption::find_for_microcredit(campaign.id, pool).await?.is_empty() {
                    errors.add("microcredit_option_id", OPTION_NOT_LEAF);
                }
            }
        }

        if let Some(amount) = new.amount.filter(|amount| *amount > 0) {
            let limits = campaign.limits();
            match limits.get(&amount) {
                Some(&limit) => {
                    let taken = Self::count_counted_with_amount(campaign.id, amount, pool).await?;
                    if taken >= i64::from(limit) {
                        errors.add("amount", AMOUNT_EXHAUSTED);
                    }
                }
                None if !limits.is_empty() => errors.add("amount", NOT_INCLUDED),
                None => {}
            }

            let document = new.document();
            if !document.is_empty() {
                let (count, total) = Self::document_totals(campaign.id, &document, pool).await?;
                if count >= MAX_LOANS_PER_DOCUMENT || total + i64::from(amount) > MAX_AMOUNT_PER_DOCUMENT {
                    errors.add("user", LENDER_LIMIT);
                }
            }
        }
        if let Some(ip) = new.ip.as_deref().filter(|ip| !is_blank(Some(ip))) {
            if Self::count_confirmed_from_ip(campaign.id, ip, pool).await? >= MAX_LOANS_PER_IP
                && !errors.includes("user", LENDER_LIMIT)
            {
                errors.add("user", LENDER_LIMIT);
            }
        }
        errors.into_result()?;

        let user_data = new.user.is_none().then(|| Json(new.lender_data()));
        let loan = sqlx::query_as::<_, Self>(
            r#"
            INSERT INTO microcredit_loans (
                id, microcredit_id, microcredit_option_id, user_id, amount, document_vatid,
                user_data, iban_account, iban_bic, ip
            )
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10)
            RETURNING *
            "#,
        )
        .bind(MicrocreditLoanId::new())
        .bind(campaign.id)
        .bind(new.microcredit_option_id)
        .bind(new.user.as_ref().map(|user| user.id))
        .bind(new.amount)
        .bind(new.document())
        .bind(user_data)
        .bind(new.iban())
        .bind(new.bic())
        .bind(&new.ip)
        .fetch_one(pool)
        .await?;

        tracing::info!(
            loan_id = %loan.id,
            microcredit_id = %campaign.id,
            amount = loan.amount,
            "microcredit loan created"
        );
        Ok(loan)
    }

    async fn reload_with(&mut self, update: &str, pool: &PgPool) -> Result<()> {
        let query = format!(
            "UPDATE microcredit_loans SET {}, updated_at = NOW() WHERE id = $1 RETURNING *",
            update
        );
        *self = sqlx::query_as::<_, Self>(&query)
            .bind(self.id)
            .fetch_one(pool)
            .await?;
        Ok(())
    }

    /// Marks the money as received. Returns false when already confirmed.
    pub async fn confirm(&mut self, pool: &PgPool) -> Result<bool> {
        if self.confirmed_at.is_some() {
            return Ok(false);
        }
        self.reload_with("confirmed_at = NOW(), discarded_at = NULL", pool)
            .await?;
        tracing::info!(loan_id = %self.id, "loan confirmed");
        Ok(true)
    }

    pub async fn unconfirm(&mut self, pool: &PgPool) -> Result<bool> {
        if self.confirmed_at.is_none() {
            return Ok(false);
        }
        self.reload_with("confirmed_at = NULL", pool).await?;
        Ok(true)
    }

    pub async fn discard(&mut self, pool: &PgPool) -> Result<bool> {
        if self.discarded_at.is_some() {
            return Ok(false);
        }
        self.reload_with("discarded_at = NOW(), confirmed_at = NULL", pool)
            .await?;
        tracing::info!(loan_id = %self.id, "loan discarded");
        Ok(true)
    }

    /// Counts the loan toward the campaign's published totals and amount
    /// limits. Returns false when already counted.
    pub async fn mark_counted(&mut self, pool: &PgPool) -> Result<bool> {
        if self.counted_at.is_some() {
            return Ok(false);
        }
        self.reload_with("counted_at = NOW()", pool).await?;
        Ok(true)
    }

    /// Records the loan as paid back. Only confirmed loans can be returned.
    pub async fn mark_returned(&mut self, pool: &PgPool) -> Result<bool> {
        if self.confirmed_at.is_none() || self.returned_at.is_some() {
            return Ok(false);
        }
        self.reload_with("returned_at = NOW()", pool).await?;
        tracing::info!(loan_id = %self.id, "loan returned");
        Ok(true)
    }

    /// Moves the loan into `target`. The new loan is confirmed and counted
    /// at once; this one is returned and points to it.
    pub async fn renew(&mut self, target: &Microcredit, pool: &PgPool) -> Result<Self> {
        if self.confirmed_at.is_none() || self.returned_at.is_some() {
            return Err(ModelError::Refused(format!(
                "Loan {} is not confirmed or was already returned",
                self.id
            ))
            .into());
        }

        let mut tx = pool.begin().await?;

        let renewed = sqlx::query_as::<_, Self>(
            r#"
            INSERT INTO microcredit_loans (
                id, microcredit_id, user_id, amount, document_vatid, user_data,
                iban_account, iban_bic, ip, confirmed_at, counted_at
            )
            SELECT $1, $2, user_id, amount, document_vatid, user_data,
                   iban_account, iban_bic, ip, NOW(), NOW()
            FROM microcredit_loans WHERE id = $3
            RETURNING *
            "#,
        )
        .bind(MicrocreditLoanId::new())
        .bind(target.id)
        .bind(self.id)
        .fetch_one(&mut *tx)
        .await?;

        let original = sqlx::query_as::<_, Self>(
            r#"
            UPDATE microcredit_loans
            SET returned_at = NOW(), transferred_to_id = $2, updated_at = NOW()
            WHERE id = $1
            RETURNING *
            "#,
        )
        .bind(self.id)
        .bind(renewed.id)
        .fetch_one(&mut *tx)
        .await?;

        tx.commit().await?;

        tracing::info!(loan_id = %self.id, renewed_id = %renewed.id, "loan renewed");
        *self = original;
        Ok(renewed)
    }

    pub async fn soft_delete(&mut self, pool: &PgPool) -> Result<()> {
        self.reload_with("deleted_at = NOW()", pool).await
    }

    pub async fn restore(&mut self, pool: &PgPool) -> Result<()> {
        self.reload_with("deleted_at = NULL", pool).await
    }

    pub async fn stats(microcredit_ids: &[MicrocreditId], pool: &PgPool) -> Result<LoanStats> {
        sqlx::query_as::<_, LoanStats>(
            r#"
            SELECT
                COUNT(*) FILTER (WHERE discarded_at IS NULL OR counted_at IS NOT NULL) AS count,
                COUNT(*) FILTER (WHERE confirmed_at IS NOT NULL
                                   AND (discarded_at IS NULL OR counted_at IS NOT NULL)) AS count_confirmed,
                COUNT(*) FILTER (WHERE counted_at IS NOT NULL) AS count_counted,
                COUNT(*) FILTER (WHERE discarded_at IS NOT NULL) AS count_discarded,
                COALESCE(SUM(amount) FILTER (WHERE discarded_at IS NULL OR counted_at IS NOT NULL), 0)::BIGINT AS amount,
                COALESCE(SUM(amount) FILTER (WHERE confirmed_at IS NOT NULL
                                   AND (discarded_at IS NULL OR counted_at IS NOT NULL)), 0)::BIGINT AS amount_confirmed,
                COALESCE(SUM(amount) FILTER (WHERE counted_at IS NOT NULL), 0)::BIGINT AS amount_counted,
                COALESCE(SUM(amount) FILTER (WHERE discarded_at IS NOT NULL), 0)::BIGINT AS amount_discarded,
                COUNT(DISTINCT document_vatid)
                    FILTER (WHERE discarded_at IS NULL OR counted_at IS NOT NULL) AS unique_lenders,
                COUNT(DISTINCT document_vatid) FILTER (WHERE confirmed_at IS NOT NULL
                                   AND (discarded_at IS NULL OR counted_at IS NOT NULL)) AS unique_confirmed
            FROM microcredit_loans
            WHERE microcredit_id = ANY($1) AND deleted_at IS NULL
            "#,
        )
        .bind(microcredit_ids)
        .fetch_one(pool)
        .await
        .map_err(Into::into)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    const IBAN: &str = "ES9121000418450200051332";

    fn campaign(active: bool) -> Microcredit {
        let now = Utc::now();
        let (starts_at, ends_at) = if active {
            (now - Duration::days(1), now + Duration::days(30))
        } else {
            (now - Duration::days(60), now - Duration::days(30))
        };
        Microcredit {
            id: MicrocreditId::new(),
            title: "Campaña 2024".to_string(),
            starts_at,
            ends_at,
            limits: Some("100€: 10\n500€: 5".to_string()),
            total_goal: None,
            account_number: Some("ES7620770024003102575766".to_string()),
            renewable: true,
            created_at: now,
            updated_at: now,
        }
    }

    fn lender() -> LenderData {
        LenderData {
            first_name: "Marta".to_string(),
            last_name: "López".to_string(),
            email: "marta@example.org".to_string(),
            address: "Calle Mayor 1".to_string(),
            postal_code: "28001".to_string(),
            town: "Madrid".to_string(),
            province: "M".to_string(),
            country: "ES".to_string(),
        }
    }

    fn anonymous(document: &str) -> NewMicrocreditLoan {
        NewMicrocreditLoan::builder()
            .microcredit_id(MicrocreditId::new())
            .amount(Some(100))
            .document_vatid(document)
            .lender(lender())
            .iban_account(IBAN)
            .terms_of_service(true)
            .minimal_year_old(true)
            .build()
    }

    fn user(document_type: i32, born_at: Option<NaiveDate>) -> User {
        let now = Utc::now();
        User {
            id: UserId::new(),
            email: "pablo@example.org".to_string(),
            first_name: "Pablo".to_string(),
            last_name: "Ruiz".to_string(),
            document_type,
            document_vatid: "12345678z".to_string(),
            country: "ES".to_string(),
            born_at,
            vote_town: None,
            vote_island_code: None,
            vote_circle_id: None,
            admin: false,
            confirmed_at: Some(now),
            sms_confirmed_at: Some(now),
            created_at: now,
            updated_at: now,
            deleted_at: None,
        }
    }

    fn loan() -> MicrocreditLoan {
        let now = Utc::now();
        MicrocreditLoan {
            id: MicrocreditLoanId::new(),
            microcredit_id: MicrocreditId::new(),
            microcredit_option_id: None,
            user_id: None,
            amount: 100,
            document_vatid: "12345678Z".to_string(),
            user_data: Some(Json(lender())),
            iban_account: IBAN.to_string(),
            iban_bic: Some("CAIXESBBXXX".to_string()),
            ip: None,
            confirmed_at: None,
            counted_at: None,
            discarded_at: None,
            returned_at: None,
            transferred_to_id: None,
            created_at: now,
            updated_at: now,
            deleted_at: None,
        }
    }

    #[test]
    fn anonymous_loan_with_full_details_is_valid() {
        let errors = anonymous("12345678z").validate(&campaign(true), Utc::now());
        assert!(errors.is_empty(), "{:?}", errors);
    }

    #[test]
    fn anonymous_loans_need_every_contact_field() {
        let mut new = anonymous("12345678Z");
        new.lender = LenderData::default();
        let errors = new.validate(&campaign(true), Utc::now());
        for field in [
            "first_name",
            "last_name",
            "email",
            "address",
            "postal_code",
            "town",
            "province",
            "country",
        ] {
            assert!(errors.includes(field, BLANK), "{}", field);
        }

        let mut new = anonymous("12345678Z");
        new.lender.email = "test@".to_string();
        let errors = new.validate(&campaign(true), Utc::now());
        assert!(errors.includes("email", "debe acabar con una letra"));
    }

    #[test]
    fn anonymous_document_must_check_out() {
        let campaign = campaign(true);
        assert!(anonymous("12345678A")
            .validate(&campaign, Utc::now())
            .includes("document_vatid", INVALID));
        assert!(anonymous("")
            .validate(&campaign, Utc::now())
            .includes("document_vatid", INVALID));
        assert!(anonymous("X1234567L").validate(&campaign, Utc::now()).is_empty());
    }

    #[test]
    fn amount_and_acceptances_are_required() {
        let mut new = anonymous("12345678Z");
        new.amount = None;
        new.terms_of_service = false;
        new.minimal_year_old = false;
        let errors = new.validate(&campaign(true), Utc::now());
        assert!(errors.includes("amount", BLANK));
        assert!(errors.includes("terms_of_service", NOT_ACCEPTED));
        assert!(errors.includes("minimal_year_old", NOT_ACCEPTED));
    }

    #[test]
    fn iban_rules() {
        let campaign = campaign(true);
        let now = Utc::now();

        let mut new = anonymous("12345678Z");
        new.iban_account = String::new();
        assert!(new.validate(&campaign, now).includes("iban_account", BLANK));

        new.iban_account = "ES9999999999999999999999".to_string();
        assert!(new.validate(&campaign, now).includes("iban_account", INVALID_IBAN));

        new.iban_account = "es76 2077 0024 0031 0257 5766".to_string();
        assert!(new.validate(&campaign, now).includes("iban_account", CAMPAIGN_ACCOUNT));

        new.iban_account = "DE89370400440532013000".to_string();
        assert!(new.is_bank_international());
        assert!(new.validate(&campaign, now).includes("iban_bic", BLANK));
        new.iban_bic = Some("cobadeffxxx".to_string());
        assert!(new.validate(&campaign, now).is_empty());
        assert_eq!(new.bic().as_deref(), Some("COBADEFFXXX"));
    }

    #[test]
    fn spanish_bic_is_filled_in() {
        let new = anonymous("12345678Z");
        assert!(!new.is_bank_international());
        assert_eq!(new.bic().as_deref(), Some("CAIXESBBXXX"));
        assert_eq!(new.iban(), IBAN);
    }

    #[test]
    fn account_holders_need_dni_or_nie_and_adulthood() {
        let campaign = campaign(true);
        let now = Utc::now();
        let today = now.date_naive();

        let mut new = anonymous("");
        new.user = Some(user(3, None));
        assert!(new.validate(&campaign, now).includes("user", PASSPORT_USER));

        let minor = today.checked_sub_months(Months::new(17 * 12)).unwrap();
        new.user = Some(user(1, Some(minor)));
        assert!(new.validate(&campaign, now).includes("user", UNDERAGE_USER));

        let adult = today.checked_sub_months(Months::new(18 * 12)).unwrap();
        new.user = Some(user(1, Some(adult)));
        new.lender = LenderData::default();
        assert!(new.validate(&campaign, now).is_empty());
        assert_eq!(new.document(), "12345678Z");
        assert_eq!(new.lender_data().first_name, "Pablo");
    }

    #[test]
    fn closed_campaign_refuses_loans() {
        let errors = anonymous("12345678Z").validate(&campaign(false), Utc::now());
        assert!(errors.includes("microcredit", CAMPAIGN_INACTIVE));
    }

    #[test]
    fn scopes() {
        let now = Utc::now();
        let fresh = loan();
        let mut counted_discarded = loan();
        counted_discarded.counted_at = Some(now);
        counted_discarded.discarded_at = Some(now);
        let mut discarded = loan();
        discarded.discarded_at = Some(now);
        let mut confirmed = loan();
        confirmed.confirmed_at = Some(now);
        let mut returned = confirmed.clone();
        returned.returned_at = Some(now);

        assert!(LoanScope::IgnoreDiscarded.includes(&fresh));
        assert!(LoanScope::IgnoreDiscarded.includes(&counted_discarded));
        assert!(!LoanScope::IgnoreDiscarded.includes(&discarded));

        assert!(LoanScope::NotReturned.includes(&confirmed));
        assert!(!LoanScope::NotReturned.includes(&returned));
        assert!(!LoanScope::NotReturned.includes(&fresh));
        assert!(LoanScope::Returned.includes(&returned));

        assert!(LoanScope::Counted.includes(&counted_discarded));
        assert!(LoanScope::NotCounted.includes(&fresh));
        assert!(LoanScope::Discarded.includes(&discarded));
        assert!(LoanScope::NotDiscarded.includes(&confirmed));
        assert!(LoanScope::NotConfirmed.includes(&fresh));
        assert!(!LoanScope::Transferred.includes(&fresh));
    }

    #[test]
    fn renewable_needs_an_open_confirmed_loan() {
        let campaign = campaign(true);
        let mut loan = loan();
        assert!(!loan.is_renewable(&campaign));
        loan.confirmed_at = Some(Utc::now());
        assert!(loan.is_renewable(&campaign));

        let mut closed = campaign.clone();
        closed.renewable = false;
        assert!(!loan.is_renewable(&closed));

        loan.returned_at = Some(Utc::now());
        assert!(!loan.is_renewable(&campaign));
    }

    #[test]
    fn unique_hash_is_stable_sha256() {
        let loan = loan();
        let first = loan.unique_hash("secret");
        assert_eq!(first, loan.unique_hash("secret"));
        assert_eq!(first.len(), 64);
        assert_ne!(first, loan.unique_hash("other"));
    }

    #[test]
    fn lender_data_only_without_user() {
        let mut loan = loan();
        assert!(!loan.has_user());
        assert_eq!(loan.lender_data().map(|d| d.first_name.as_str()), Some("Marta"));
        loan.user_id = Some(UserId::new());
        loan.user_data = None;
        assert!(loan.has_user());
        assert!(loan.lender_data().is_none());
        assert!(loan.iban_valid());
    }
}

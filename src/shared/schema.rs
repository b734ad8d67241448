diesel::table! {
    legal_reviews.documents (id) {
        id -> Uuid,
        title -> Varchar,
        summary -> Text,
        description -> Text,
        document_version -> Int4,
        review_version -> Int4,
        risk_version -> Int4,
        created_by -> Varchar,
        created_at -> Timestamptz,
        updated_at -> Timestamptz,
    }
}

diesel::table! {
    legal_reviews.risk_categories (id) {
        id -> Uuid,
        name -> Varchar,
        description -> Text,
        created_by -> Varchar,
        created_at -> Timestamptz,
        updated_at -> Timestamptz,
    }
}

diesel::table! {
    legal_reviews.reviews (id) {
        id -> Uuid,
        document_id -> Uuid,
        version -> Int4,
        reviewer_email -> Varchar,
        reviewer_name -> Varchar,
        review_date -> Timestamptz,
        comments -> Nullable<Text>,
        created_at -> Timestamptz,
    }
}

diesel::table! {
    legal_reviews.review_risks (id) {
        id -> Uuid,
        review_id -> Uuid,
        risk_text -> Text,
        legal_suggestion -> Text,
        final_definition -> Text,
        category_id -> Nullable<Uuid>,
        created_at -> Timestamptz,
    }
}

diesel::table! {
    legal_reviews.review_observations (id) {
        id -> Uuid,
        review_id -> Uuid,
        observations -> Text,
    }
}

diesel::table! {
    legal_reviews.review_documents (id) {
        id -> Uuid,
        review_id -> Uuid,
        file_name -> Varchar,
        file_path -> Text,
        file_size -> Int8,
        uploaded_by -> Varchar,
        uploaded_at -> Timestamptz,
    }
}

diesel::table! {
    legal_reviews.review_viewers (review_id, user_email) {
        review_id -> Uuid,
        user_email -> Varchar,
        can_view -> Bool,
        granted_at -> Timestamptz,
    }
}

diesel::table! {
    legal_reviews.review_approvals (id) {
        id -> Uuid,
        review_id -> Uuid,
        approver_email -> Varchar,
        approver_name -> Varchar,
        status -> Varchar,
        comments -> Text,
        approved_at -> Nullable<Timestamptz>,
        created_at -> Timestamptz,
    }
}

diesel::table! {
    legal_reviews.review_approval_requests (id) {
        id -> Uuid,
        review_id -> Uuid,
        requested_by -> Varchar,
        status -> Varchar,
        created_at -> Timestamptz,
    }
}

diesel::joinable!(reviews -> documents (document_id));
diesel::joinable!(review_risks -> reviews (review_id));
diesel::joinable!(review_risks -> risk_categories (category_id));
diesel::joinable!(review_observations -> reviews (review_id));
diesel::joinable!(review_documents -> reviews (review_id));
diesel::joinable!(review_viewers -> reviews (review_id));
diesel::joinable!(review_approvals -> reviews (review_id));
diesel::joinable!(review_approval_requests -> reviews (review_id));

diesel::allow_tables_to_appear_in_same_query!(
    documents,
    risk_categories,
    reviews,
    review_risks,
    review_observations,
    review_documents,
    review_viewers,
    review_approvals,
    review_approval_requests,
);
